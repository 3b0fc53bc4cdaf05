pub mod convergence;
pub mod instrumentation;
pub mod launch;
pub mod lifecycle;
pub mod subscription;
pub mod teardown;
