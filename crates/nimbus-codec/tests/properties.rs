use nimbus_codec::decode::decode_stream;
use nimbus_codec::encode::encode_stream;
use nimbus_codec::rewrite::rewrite_images;
use proptest::prelude::*;

fn deployment_fixture(containers: usize, init_containers: usize) -> String {
    let mut out = String::from(
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: sample\nspec:\n  selector:\n    matchLabels:\n      app: sample\n  template:\n    metadata:\n      labels:\n        app: sample\n    spec:\n",
    );
    if init_containers > 0 {
        out.push_str("      initContainers:\n");
        for i in 0..init_containers {
            out.push_str(&format!(
                "      - name: init{i}\n        image: registry/init{i}:1.0\n"
            ));
        }
    }
    out.push_str("      containers:\n");
    for i in 0..containers {
        out.push_str(&format!(
            "      - name: main{i}\n        image: registry/main{i}:1.0\n"
        ));
    }
    out
}

proptest! {
    // P4: rewriting with f(x) = x + "@x" yields exactly n+m image
    // substitutions (one per container/init-container) and touches
    // nothing else about the object.
    #[test]
    fn rewrite_substitutes_every_container_image_exactly_once(
        containers in 1usize..4,
        init_containers in 0usize..3,
    ) {
        let input = deployment_fixture(containers, init_containers);
        let mut docs = decode_stream(&input).unwrap();
        rewrite_images(&mut docs, |image| format!("{image}@x")).unwrap();
        let out = encode_stream(&docs).unwrap();

        let substitutions = out.matches("@x").count();
        prop_assert_eq!(substitutions, containers + init_containers);
        prop_assert!(out.contains("name: sample"));
        prop_assert!(out.contains("app: sample"));
    }
}

#[test]
fn round_trip_preserves_type_meta_order_and_unknown_bytes() {
    let input = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  annotations:\n    note: keep me\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: b\nspec:\n  selector:\n    matchLabels:\n      app: b\n  template:\n    metadata:\n      labels:\n        app: b\n    spec:\n      containers:\n      - name: main\n        image: registry/main:1.0\n";
    let docs = decode_stream(input).unwrap();
    let kinds: Vec<&str> = docs.iter().map(|d| d.object.kind()).collect();
    assert_eq!(kinds, vec!["ConfigMap", "Deployment"]);

    let out = encode_stream(&docs).unwrap();
    assert!(out.contains("note: keep me"));
    let configmap_pos = out.find("kind: ConfigMap").unwrap();
    let deployment_pos = out.find("kind: Deployment").unwrap();
    assert!(configmap_pos < deployment_pos);
}
