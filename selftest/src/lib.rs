/*!

Provides the environment the harness runs in during end-to-end testing: a `kind` cluster with the
mesh installed through `helm`. Both tools are driven through their command lines and must be
available, as must `docker` with the mesh and workload images pulled.

!*/

pub mod cluster;
mod command;
pub mod environment;
pub mod helm;
mod test_settings;

pub use cluster::{Cluster, Kind};
pub use environment::Environment;
pub use helm::Helm;
pub use test_settings::TestSettings;
