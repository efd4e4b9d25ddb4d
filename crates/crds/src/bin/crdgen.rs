//! Prints the NodeTask CRD manifest as YAML.
//!
//! Usage: `cargo run --bin crdgen > manifests/nodetask-crd.yaml`

use kube::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&crds::NodeTask::crd()) {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to render NodeTask CRD: {e}");
            std::process::exit(1);
        }
    }
}
