//! Architecture support.
//!
//! [`CpuIrq`] names the [`IrqControl`](crate::sync::irq::IrqControl)
//! implementation for the target being built.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod arm;
        pub use arm::irq::ArmIrq as CpuIrq;
    } else {
        pub mod host;
        pub use host::irq::HostIrq as CpuIrq;
    }
}
