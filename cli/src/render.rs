use crate::Overrides;
use anyhow::{Context, Result};
use clap::Parser;
use model::{RunParameters, TopologyBuilder};

/// Print the objects of a run as multi-document YAML.
#[derive(Debug, Parser)]
pub(crate) struct Render {
    /// Also print the mesh-wide defaults the environment installs.
    #[clap(long = "mesh-defaults")]
    mesh_defaults: bool,

    #[clap(flatten)]
    overrides: Overrides,
}

impl Render {
    pub(crate) fn run(&self) -> Result<()> {
        let config = self.overrides.config()?;
        let params = RunParameters::generate(&config);
        let builder = TopologyBuilder::new(&params);
        if self.mesh_defaults {
            let defaults = builder
                .mesh_defaults()
                .context("Unable to build the mesh defaults")?;
            print!("{}", defaults.to_yaml()?);
        }
        let topology = builder
            .dependency_detection()
            .context("Unable to build the topology")?;
        print!("{}", topology.to_yaml()?);
        Ok(())
    }
}
