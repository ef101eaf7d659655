//! In-memory device runtime used to drive the benchmark driver without a GPU.
//!
//! Buffers and modules report their release to shared counters, and any runtime call can be made
//! to fail to exercise the error paths.

#![allow(dead_code)]

use gemm_eval::{
    device::{
        check_transfer, CompileError, DeviceError, DeviceMemory, DeviceRuntime, ExecutionTimer,
        GemmArgs,
    },
    kernels::device::KernelSource,
    launch::LaunchGeometry,
    problem::f32_from_bytes,
};

use std::{
    cell::{Cell, RefCell},
    fs,
    path::Path,
    rc::Rc,
    time::Instant,
};

use tempfile::TempDir;

/// Runtime call to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    /// Fails the n-th allocation (1-based).
    Allocate(usize),
    CopyToDevice,
    Timer,
    Launch,
    CopyToHost,
    /// Launch succeeds but the first element of `C` is off by one.
    WrongResult,
}

#[derive(Debug, Default)]
pub struct Counters {
    allocs: Cell<usize>,
    frees: Cell<usize>,
    loads: Cell<usize>,
    unloads: Cell<usize>,
}

pub struct FakeBuffer {
    data: Vec<u8>,
    counters: Rc<Counters>,
}

impl DeviceMemory for FakeBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        self.counters.frees.set(self.counters.frees.get() + 1);
    }
}

pub struct FakeModule {
    entry_point: String,
    counters: Rc<Counters>,
}

impl Drop for FakeModule {
    fn drop(&mut self) {
        self.counters.unloads.set(self.counters.unloads.get() + 1);
    }
}

pub struct FakeTimer;

impl ExecutionTimer for FakeTimer {
    type Mark = ();

    fn time<F>(&mut self, launch: F) -> Result<f32, DeviceError>
    where
        F: FnOnce(&mut ()) -> Result<(), DeviceError>,
    {
        let start = Instant::now();
        launch(&mut ())?;
        Ok(start.elapsed().as_secs_f32() * 1e3)
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    counters: Rc<Counters>,
    fail_at: Option<FailPoint>,
    launches: RefCell<Vec<LaunchGeometry>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(fail_at: FailPoint) -> Self {
        Self {
            fail_at: Some(fail_at),
            ..Self::default()
        }
    }

    /// Number of successful allocations.
    pub fn allocs(&self) -> usize {
        self.counters.allocs.get()
    }

    pub fn frees(&self) -> usize {
        self.counters.frees.get()
    }

    /// Number of successfully compiled modules.
    pub fn loads(&self) -> usize {
        self.counters.loads.get()
    }

    pub fn unloads(&self) -> usize {
        self.counters.unloads.get()
    }

    /// Geometries of all launches, in order.
    pub fn launches(&self) -> Vec<LaunchGeometry> {
        self.launches.borrow().clone()
    }

    fn fail(&self, point: FailPoint, op: &'static str) -> Result<(), DeviceError> {
        if self.fail_at == Some(point) {
            return Err(DeviceError::Runtime {
                op,
                status: "injected failure".to_owned(),
            });
        }
        Ok(())
    }
}

impl DeviceRuntime for FakeRuntime {
    type Buffer = FakeBuffer;
    type Module = FakeModule;
    type Timer = FakeTimer;

    fn name(&self) -> String {
        "fake device".to_owned()
    }

    fn architecture(&self) -> Result<String, DeviceError> {
        Ok("compute_80".to_owned())
    }

    fn allocate(&self, nb_bytes: usize) -> Result<FakeBuffer, DeviceError> {
        let nth = self.counters.allocs.get() + 1;
        self.fail(FailPoint::Allocate(nth), "allocate")?;
        self.counters.allocs.set(nth);
        Ok(FakeBuffer {
            data: vec![0; nb_bytes],
            counters: Rc::clone(&self.counters),
        })
    }

    fn copy_to_device(&self, dst: &mut FakeBuffer, src: &[u8]) -> Result<(), DeviceError> {
        check_transfer("copy_to_device", dst.len(), src.len())?;
        self.fail(FailPoint::CopyToDevice, "copy_to_device")?;
        dst.data.copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, src: &FakeBuffer, dst: &mut [u8]) -> Result<(), DeviceError> {
        check_transfer("copy_to_host", src.len(), dst.len())?;
        self.fail(FailPoint::CopyToHost, "copy_to_host")?;
        dst.copy_from_slice(&src.data);
        Ok(())
    }

    fn compile(
        &self,
        source: &KernelSource,
        arch: &str,
        _flags: &[String],
    ) -> Result<FakeModule, CompileError> {
        let text = source.text();
        if text.matches('{').count() != text.matches('}').count() {
            return Err(CompileError::Diagnostics {
                kernel: source.name().to_owned(),
                arch: arch.to_owned(),
                log: format!(
                    "{}: error: expected a \"}}\"\n1 error detected in the compilation.",
                    source.path().display()
                ),
            });
        }
        if !text.contains(source.entry_point()) {
            return Err(CompileError::MissingEntryPoint {
                kernel: source.name().to_owned(),
                entry_point: source.entry_point().to_owned(),
            });
        }

        self.counters.loads.set(self.counters.loads.get() + 1);
        Ok(FakeModule {
            entry_point: source.entry_point().to_owned(),
            counters: Rc::clone(&self.counters),
        })
    }

    fn timer(&self) -> Result<FakeTimer, DeviceError> {
        self.fail(FailPoint::Timer, "timer")?;
        Ok(FakeTimer)
    }

    fn launch(
        &self,
        module: &FakeModule,
        geometry: &LaunchGeometry,
        args: GemmArgs<'_, FakeBuffer>,
        timer: &mut FakeTimer,
    ) -> Result<f32, DeviceError> {
        assert_eq!(module.entry_point, "matmul_kernel");
        let (m, n, k) = (args.m as usize, args.n as usize, args.k as usize);
        let a = f32_from_bytes(&args.a.data);
        let b = f32_from_bytes(&args.b.data);
        let mut c = f32_from_bytes(&args.c.data);

        let elapsed_ms = timer.time(|_| {
            self.fail(FailPoint::Launch, "launch")?;
            self.launches.borrow_mut().push(*geometry);
            for row in 0..m {
                for col in 0..n {
                    let acc: f32 = (0..k).map(|i| a[row * k + i] * b[i * n + col]).sum();
                    c[row * n + col] = args.alpha * acc + args.beta * c[row * n + col];
                }
            }
            Ok(())
        })?;
        if self.fail_at == Some(FailPoint::WrongResult) {
            c[0] += 1.0;
        }

        args.c.data = c.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Ok(elapsed_ms)
    }
}

/// Creates a kernel directory holding `kernels` as CUDA sources.
pub fn kernel_dir(kernels: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("failed to create temporary directory");
    for (name, text) in kernels {
        write_kernel(dir.path(), name, text);
    }
    dir
}

pub fn write_kernel(root: &Path, name: &str, text: &str) {
    let dir = root.join("cuda");
    fs::create_dir_all(&dir).expect("failed to create kernel directory");
    fs::write(dir.join(format!("{name}.cu")), text).expect("failed to write kernel");
}

pub const NAIVE_KERNEL: &str = include_str!("../../kernels/cuda/naive_matmul.cu");
pub const BLOCKED_KERNEL: &str = include_str!("../../kernels/cuda/blocked_matmul.cu");
