mod backend;
mod kernel;
mod registry;
mod userspace;

pub use backend::{ForwardBackend, ForwardError, ForwardHandle};
pub use kernel::KernelForward;
pub use registry::{service_forward_key, ForwardRegistry};
pub use userspace::UserspaceForward;
