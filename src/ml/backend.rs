// ============================================================
// Layer 5 — Backend Selection
// ============================================================
// Burn backends used by the runner:
//
//   ComputeBackend   NdArray (CPU) by default, Wgpu with the
//                    `wgpu` cargo feature
//   TrainBackend     Autodiff<ComputeBackend>, for gradients
//
// model.valid() turns a TrainBackend model into a
// ComputeBackend one for evaluation and decoding.
//
// Reference: Burn Book §2 (Backends)

use burn::tensor::backend::Backend;

use crate::domain::error::RunnerError;
use crate::infra::device::DeviceId;

#[cfg(not(feature = "wgpu"))]
pub type ComputeBackend = burn::backend::NdArray;
#[cfg(feature = "wgpu")]
pub type ComputeBackend = burn::backend::Wgpu;

pub type TrainBackend = burn::backend::Autodiff<ComputeBackend>;

pub type ComputeDevice = <ComputeBackend as Backend>::Device;

/// Map a reserved device onto the compiled-in backend.
#[cfg(not(feature = "wgpu"))]
pub fn compute_device(id: DeviceId) -> Result<ComputeDevice, RunnerError> {
    match id {
        DeviceId::Cpu => Ok(burn::backend::ndarray::NdArrayDevice::Cpu),
        DeviceId::Gpu(_) => Err(RunnerError::DeviceUnavailable(format!(
            "{id} requested but this build only has the CPU backend (enable the `wgpu` feature)"
        ))),
    }
}

#[cfg(feature = "wgpu")]
pub fn compute_device(id: DeviceId) -> Result<ComputeDevice, RunnerError> {
    use burn::backend::wgpu::WgpuDevice;
    Ok(match id {
        DeviceId::Cpu => WgpuDevice::Cpu,
        DeviceId::Gpu(i) => WgpuDevice::DiscreteGpu(i as usize),
    })
}
