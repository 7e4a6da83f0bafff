mod error;
mod kube_client;
mod object_client;

pub use error::{AllowNotFound, Error, Result};
pub use kube_client::KubeObjectClient;
pub use object_client::{selector_string, ExecOutput, Instance, ObjectClient};
