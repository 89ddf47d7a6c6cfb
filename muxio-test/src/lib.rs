//! Test support for muxio: a mock resolver that exercises the DNS driver
//! contract, and two small demo services (echo, daytime) that drive the
//! public reactor API the way an application would.

pub mod daytime;
pub mod echo;
pub mod mock_resolver;

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call from every
/// test; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
