//! NVIDIA CUDA device runtime.
//!
//! Kernel sources are compiled at runtime to PTX with NVRTC (through [`cudarc`][1]), then loaded
//! and launched with [`cust`][2].
//!
//! [1]: https://crates.io/crates/cudarc
//! [2]: https://crates.io/crates/cust

use super::{
    check_transfer, CheckStatus, CompileError, DeviceError, DeviceMemory, DeviceRuntime,
    ExecutionTimer, GemmArgs,
};
use crate::{kernels::device::KernelSource, launch::LaunchGeometry};

use cudarc::nvrtc::{compile_ptx_with_opts, CompileError as NvrtcError, CompileOptions};
use cust::{
    context::Context,
    device::{Device, DeviceAttribute},
    event::{Event, EventFlags},
    function::{BlockSize, GridSize},
    launch,
    memory::{CopyDestination, DeviceBuffer},
    module::Module,
    stream::{Stream, StreamFlags},
    CudaFlags,
};
use tracing::debug;

use std::sync::Arc;

/// CUDA context and stream of one device.
// NOTE: fields are dropped in declaration order, the stream must go before the context.
pub struct CudaRuntime {
    stream: Arc<Stream>,
    device: Device,
    _ctx: Context,
}

impl CudaRuntime {
    /// Initializes the CUDA driver and creates a context on device `ordinal`.
    pub fn init(ordinal: u32) -> Result<Self, DeviceError> {
        cust::init(CudaFlags::empty()).check("cuInit")?;
        let nb_devices = Device::num_devices().check("cuDeviceGetCount")?;
        if ordinal >= nb_devices {
            return Err(DeviceError::Unavailable(format!(
                "device {ordinal} requested but only {nb_devices} CUDA device(s) found"
            )));
        }

        let device = Device::get_device(ordinal).check("cuDeviceGet")?;
        let ctx = Context::new(device).check("cuCtxCreate")?;
        let stream = Stream::new(StreamFlags::DEFAULT, None).check("cuStreamCreate")?;

        Ok(Self {
            stream: Arc::new(stream),
            device,
            _ctx: ctx,
        })
    }
}

/// Device memory region.
pub struct CudaBuffer {
    inner: DeviceBuffer<u8>,
}

impl DeviceMemory for CudaBuffer {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Loaded PTX module. Unloaded on drop.
pub struct CudaModule {
    module: Module,
    entry_point: String,
}

/// Pair of CUDA events recorded on the runtime's stream.
pub struct CudaTimer {
    start: Event,
    stop: Event,
    stream: Arc<Stream>,
}

impl ExecutionTimer for CudaTimer {
    type Mark = ();

    fn time<F>(&mut self, launch: F) -> Result<f32, DeviceError>
    where
        F: FnOnce(&mut ()) -> Result<(), DeviceError>,
    {
        self.start.record(&self.stream).check("cuEventRecord")?;
        launch(&mut ())?;
        self.stop.record(&self.stream).check("cuEventRecord")?;
        self.stop.synchronize().check("cuEventSynchronize")?;
        self.stop
            .elapsed_time_f32(&self.start)
            .check("cuEventElapsedTime")
    }
}

impl DeviceRuntime for CudaRuntime {
    type Buffer = CudaBuffer;
    type Module = CudaModule;
    type Timer = CudaTimer;

    fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "unknown CUDA device".to_owned())
    }

    fn architecture(&self) -> Result<String, DeviceError> {
        let major = self
            .device
            .get_attribute(DeviceAttribute::ComputeCapabilityMajor)
            .check("cuDeviceGetAttribute")?;
        let minor = self
            .device
            .get_attribute(DeviceAttribute::ComputeCapabilityMinor)
            .check("cuDeviceGetAttribute")?;
        Ok(format!("compute_{major}{minor}"))
    }

    fn allocate(&self, nb_bytes: usize) -> Result<CudaBuffer, DeviceError> {
        let inner = DeviceBuffer::<u8>::zeroed(nb_bytes).check("cuMemAlloc")?;
        Ok(CudaBuffer { inner })
    }

    fn copy_to_device(&self, dst: &mut CudaBuffer, src: &[u8]) -> Result<(), DeviceError> {
        check_transfer("cuMemcpyHtoD", dst.len(), src.len())?;
        dst.inner.copy_from(src).check("cuMemcpyHtoD")
    }

    fn copy_to_host(&self, src: &CudaBuffer, dst: &mut [u8]) -> Result<(), DeviceError> {
        check_transfer("cuMemcpyDtoH", src.len(), dst.len())?;
        src.inner.copy_to(dst).check("cuMemcpyDtoH")
    }

    fn compile(
        &self,
        source: &KernelSource,
        arch: &str,
        flags: &[String],
    ) -> Result<CudaModule, CompileError> {
        let mut options = vec![format!("--gpu-architecture={arch}")];
        options.extend(flags.iter().cloned());
        debug!("nvrtc options for `{}`: {options:?}", source.name());

        let opts = CompileOptions {
            options,
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(source.text(), opts).map_err(|e| {
            let log = match e {
                NvrtcError::CompileError { log, .. } => log.to_string_lossy().into_owned(),
                other => format!("{other:?}"),
            };
            CompileError::Diagnostics {
                kernel: source.name().to_owned(),
                arch: arch.to_owned(),
                log,
            }
        })?;

        let module = Module::from_ptx(ptx.to_src(), &[]).check("cuModuleLoadData")?;
        if module.get_function(source.entry_point()).is_err() {
            return Err(CompileError::MissingEntryPoint {
                kernel: source.name().to_owned(),
                entry_point: source.entry_point().to_owned(),
            });
        }

        Ok(CudaModule {
            module,
            entry_point: source.entry_point().to_owned(),
        })
    }

    fn timer(&self) -> Result<CudaTimer, DeviceError> {
        Ok(CudaTimer {
            start: Event::new(EventFlags::DEFAULT).check("cuEventCreate")?,
            stop: Event::new(EventFlags::DEFAULT).check("cuEventCreate")?,
            stream: Arc::clone(&self.stream),
        })
    }

    fn launch(
        &self,
        module: &CudaModule,
        geometry: &LaunchGeometry,
        args: GemmArgs<'_, CudaBuffer>,
        timer: &mut CudaTimer,
    ) -> Result<f32, DeviceError> {
        let kernel = module
            .module
            .get_function(&module.entry_point)
            .check("cuModuleGetFunction")?;

        let grid_size = GridSize::xyz(geometry.grid.x, geometry.grid.y, geometry.grid.z);
        let block_size = BlockSize::xyz(geometry.block.x, geometry.block.y, geometry.block.z);
        let stream = &*self.stream;

        let d_a = args.a.inner.as_device_ptr();
        let d_b = args.b.inner.as_device_ptr();
        let d_c = args.c.inner.as_device_ptr();
        let (m, n, k, alpha, beta) = (args.m, args.n, args.k, args.alpha, args.beta);

        timer.time(|_| unsafe {
            launch!(
                kernel<<<grid_size, block_size, 0, stream>>>(
                    m, n, k,
                    d_a,
                    d_b,
                    d_c,
                    alpha,
                    beta
                )
            )
            .check("cuLaunchKernel")
        })
    }
}
