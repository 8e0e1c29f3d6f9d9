//! # Policy Implementations
//!
//! The built-in scheduling policies. Each owns its runqueue and per-task
//! private state exclusively; the kernel mediates every call through the
//! protocol in [`super::traits`].

pub mod fair;
pub mod fcfs;
pub mod idle;
pub mod linux_o1;
pub mod linux_on;
pub mod linux_orig;
#[cfg(feature = "qlearn")]
pub mod qlearn;
pub mod round;
pub mod sjf;

pub use fair::FairPolicy;
pub use fcfs::FcfsPolicy;
pub use idle::IdlePolicy;
pub use linux_o1::LinuxO1Policy;
pub use linux_on::LinuxOnPolicy;
pub use linux_orig::LinuxOrigPolicy;
#[cfg(feature = "qlearn")]
pub use qlearn::QLearnPolicy;
pub use round::RoundPolicy;
pub use sjf::SjfPolicy;

use super::traits::SchedPolicy;

/// The built-in policy set, in default registered priority order.
pub fn builtin_policies() -> Vec<Box<dyn SchedPolicy>> {
    #[cfg_attr(not(feature = "qlearn"), allow(unused_mut))]
    let mut policies: Vec<Box<dyn SchedPolicy>> = vec![
        Box::new(FcfsPolicy::new()),
        Box::new(RoundPolicy::new()),
        Box::new(SjfPolicy::new()),
        Box::new(LinuxOrigPolicy::new()),
        Box::new(LinuxOnPolicy::new()),
        Box::new(LinuxO1Policy::new()),
        Box::new(FairPolicy::new()),
    ];
    #[cfg(feature = "qlearn")]
    policies.push(Box::new(QLearnPolicy::new()));
    policies
}
