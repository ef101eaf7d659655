//! OpenCL device runtime.
//!
//! Kernel sources are built at runtime by the platform's OpenCL compiler through [`ocl`][1].
//!
//! [1]: https://crates.io/crates/ocl

use super::{
    check_transfer, CheckStatus, CompileError, DeviceError, DeviceMemory, DeviceRuntime,
    ExecutionTimer, GemmArgs,
};
use crate::{kernels::device::KernelSource, launch::LaunchGeometry};

use ocl::{
    enums::{DeviceInfo, ProfilingInfo, ProfilingInfoResult, ProgramInfo, ProgramInfoResult},
    flags::QUEUE_PROFILING_ENABLE,
    Buffer, Context, Device, Event, Kernel, Platform, Program, Queue, SpatialDims,
};
use tracing::debug;

/// OpenCL context and in-order, profiling-enabled command queue of one device.
pub struct OclRuntime {
    queue: Queue,
    context: Context,
    device: Device,
}

impl OclRuntime {
    /// Creates a context and a queue on device `index` of the default platform.
    pub fn init(index: usize) -> Result<Self, DeviceError> {
        let platform = Platform::default();
        let devices = Device::list_all(platform).check("clGetDeviceIDs")?;
        let device = *devices.get(index).ok_or_else(|| {
            DeviceError::Unavailable(format!(
                "device {index} requested but only {} OpenCL device(s) found",
                devices.len()
            ))
        })?;

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .check("clCreateContext")?;
        let queue = Queue::new(&context, device, Some(QUEUE_PROFILING_ENABLE))
            .check("clCreateCommandQueue")?;

        Ok(Self {
            queue,
            context,
            device,
        })
    }
}

/// Device memory region.
pub struct OclBuffer {
    inner: Buffer<u8>,
}

impl DeviceMemory for OclBuffer {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Built program and its kernel object. Released on drop.
pub struct OclModule {
    kernel: Kernel,
    _program: Program,
}

/// Reads the device timestamps of the launch's own event.
pub struct OclTimer;

impl ExecutionTimer for OclTimer {
    type Mark = Option<Event>;

    fn time<F>(&mut self, launch: F) -> Result<f32, DeviceError>
    where
        F: FnOnce(&mut Option<Event>) -> Result<(), DeviceError>,
    {
        let mut mark = None;
        launch(&mut mark)?;
        let event = mark.ok_or_else(|| DeviceError::Runtime {
            op: "clEnqueueNDRangeKernel",
            status: "launch recorded no event".to_owned(),
        })?;

        event.wait_for().check("clWaitForEvents")?;
        let start = profiling_time(&event, ProfilingInfo::Start)?;
        let end = profiling_time(&event, ProfilingInfo::End)?;
        Ok(end.saturating_sub(start) as f32 * 1e-6)
    }
}

// Device timestamp in nanoseconds.
fn profiling_time(event: &Event, info: ProfilingInfo) -> Result<u64, DeviceError> {
    match event.profiling_info(info).check("clGetEventProfilingInfo")? {
        ProfilingInfoResult::Start(ns) | ProfilingInfoResult::End(ns) => Ok(ns),
        other => Err(DeviceError::Runtime {
            op: "clGetEventProfilingInfo",
            status: format!("unexpected result {other:?}"),
        }),
    }
}

impl DeviceRuntime for OclRuntime {
    type Buffer = OclBuffer;
    type Module = OclModule;
    type Timer = OclTimer;

    fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "unknown OpenCL device".to_owned())
    }

    fn architecture(&self) -> Result<String, DeviceError> {
        let name = self.device.name().check("clGetDeviceInfo")?;
        let version = self
            .device
            .info(DeviceInfo::Version)
            .check("clGetDeviceInfo")?;
        Ok(format!("{name} ({version})"))
    }

    fn allocate(&self, nb_bytes: usize) -> Result<OclBuffer, DeviceError> {
        let inner = Buffer::<u8>::builder()
            .queue(self.queue.clone())
            .len(nb_bytes)
            .build()
            .check("clCreateBuffer")?;
        Ok(OclBuffer { inner })
    }

    fn copy_to_device(&self, dst: &mut OclBuffer, src: &[u8]) -> Result<(), DeviceError> {
        check_transfer("clEnqueueWriteBuffer", dst.len(), src.len())?;
        dst.inner.write(src).enq().check("clEnqueueWriteBuffer")
    }

    fn copy_to_host(&self, src: &OclBuffer, dst: &mut [u8]) -> Result<(), DeviceError> {
        check_transfer("clEnqueueReadBuffer", src.len(), dst.len())?;
        src.inner.read(dst).enq().check("clEnqueueReadBuffer")
    }

    fn compile(
        &self,
        source: &KernelSource,
        arch: &str,
        flags: &[String],
    ) -> Result<OclModule, CompileError> {
        debug!("building `{}` for {arch} with {flags:?}", source.name());

        let mut builder = Program::builder();
        builder.src(source.text()).devices(self.device);
        for flag in flags {
            builder.cmplr_opt(flag.as_str());
        }
        // The build log is part of the error message.
        let program = builder
            .build(&self.context)
            .map_err(|e| CompileError::Diagnostics {
                kernel: source.name().to_owned(),
                arch: arch.to_owned(),
                log: e.to_string(),
            })?;

        let names = match program
            .info(ProgramInfo::KernelNames)
            .check("clGetProgramInfo")?
        {
            ProgramInfoResult::KernelNames(names) => names,
            other => other.to_string(),
        };
        if !names.split(';').any(|name| name.trim() == source.entry_point()) {
            return Err(CompileError::MissingEntryPoint {
                kernel: source.name().to_owned(),
                entry_point: source.entry_point().to_owned(),
            });
        }

        // Arguments are bound at launch. Buffers are untyped bytes while the kernel expects
        // typed pointers.
        let mut builder = Kernel::builder();
        builder
            .program(&program)
            .name(source.entry_point())
            .queue(self.queue.clone())
            .arg_named("M", 0_i32)
            .arg_named("N", 0_i32)
            .arg_named("K", 0_i32)
            .arg_named("A", None::<&Buffer<u8>>)
            .arg_named("B", None::<&Buffer<u8>>)
            .arg_named("C", None::<&Buffer<u8>>)
            .arg_named("alpha", 0.0_f32)
            .arg_named("beta", 0.0_f32);
        unsafe {
            builder.disable_arg_type_check();
        }
        let kernel = builder.build().check("clCreateKernel")?;

        Ok(OclModule {
            kernel,
            _program: program,
        })
    }

    fn timer(&self) -> Result<OclTimer, DeviceError> {
        Ok(OclTimer)
    }

    fn launch(
        &self,
        module: &OclModule,
        geometry: &LaunchGeometry,
        args: GemmArgs<'_, OclBuffer>,
        timer: &mut OclTimer,
    ) -> Result<f32, DeviceError> {
        let kernel = &module.kernel;
        kernel.set_arg("M", args.m).check("clSetKernelArg")?;
        kernel.set_arg("N", args.n).check("clSetKernelArg")?;
        kernel.set_arg("K", args.k).check("clSetKernelArg")?;
        kernel.set_arg("A", &args.a.inner).check("clSetKernelArg")?;
        kernel.set_arg("B", &args.b.inner).check("clSetKernelArg")?;
        kernel.set_arg("C", &args.c.inner).check("clSetKernelArg")?;
        kernel.set_arg("alpha", args.alpha).check("clSetKernelArg")?;
        kernel.set_arg("beta", args.beta).check("clSetKernelArg")?;

        let global = geometry.global();
        let block = geometry.block;
        let global = SpatialDims::Three(global.x as usize, global.y as usize, global.z as usize);
        let local = SpatialDims::Three(block.x as usize, block.y as usize, block.z as usize);

        self.queue.finish().check("clFinish")?;
        timer.time(|mark| {
            let mut event = Event::empty();
            unsafe {
                kernel
                    .cmd()
                    .global_work_size(global)
                    .local_work_size(local)
                    .enew(&mut event)
                    .enq()
                    .check("clEnqueueNDRangeKernel")?;
            }
            *mark = Some(event);
            Ok(())
        })
    }
}
