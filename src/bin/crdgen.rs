//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the Envoy custom
//! resource managed by the envoy-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/envoy.yaml

use envoy_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
