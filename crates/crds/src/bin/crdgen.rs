//! Prints the StaticSite CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/staticsite.yaml`

use crds::StaticSite;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = StaticSite::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
