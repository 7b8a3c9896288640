mod docker;
mod factory;
mod local;
mod ready;
mod stream;
mod traits;

pub use docker::DockerRuntime;
pub use factory::{available_runtimes, create_runtime, RuntimeInfo};
pub use local::LocalRuntime;
pub use ready::{detect_port, ReadyListeners};
pub use stream::OUTPUT_CHANNEL_CAPACITY;
pub use traits::{InstanceInfo, SandboxInstance, SandboxRuntime, ServerReady, SpawnedProcess};
