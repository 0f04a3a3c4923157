//! wgpu backend for the brute-force kernel.

use std::{mem::size_of, sync::mpsc};

use bytemuck::{Pod, Zeroable};
use tracing::debug;
use wgpu::util::DeviceExt;

use crate::{BruteForceKnn, GpuError, KnnOutput, Result, Shape};

const SHADER: &str = include_str!("shader.wgsl");

/// Must match `@workgroup_size` in the shader.
const WORKGROUP_SIZE: usize = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Params {
    n_ref: u32,
    n_query: u32,
    dim: u32,
    k: u32,
}

/// Brute-force Chebyshev KNN on a wgpu device.
///
/// The device, queue and compute pipeline are created once in [`WgpuKnn::new`] and reused for
/// every call to [`BruteForceKnn::knn`]. Each call uploads both point sets, dispatches one
/// invocation per query point and blocks until the results are read back.
pub struct WgpuKnn {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    adapter_name: String,
}

impl WgpuKnn {
    /// Acquire the highest-performance adapter available and compile the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::NoAdapter`] if wgpu finds no adapter and
    /// [`GpuError::RequestDevice`] if the adapter refuses to open a device.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gpu_knn"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::RequestDevice(e.to_string()))?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("chebyshev_knn"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("chebyshev_knn"),
            layout: None,
            module: &module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        debug!(adapter = %adapter_name, "compiled brute-force KNN pipeline");

        Ok(Self {
            device,
            queue,
            pipeline,
            adapter_name,
        })
    }

    #[must_use]
    /// Name of the adapter this backend runs on.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Check that a storage buffer of `len` elements of `T` fits in one binding.
    fn check_binding<T>(&self, what: &'static str, len: usize) -> Result<u64> {
        let size = (len * size_of::<T>()) as u64;
        let limits = self.device.limits();
        let limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if size > limit {
            return Err(GpuError::BufferTooLarge { what, size, limit });
        }
        Ok(size)
    }

    /// Split `n_groups` workgroups into a 2D grid that respects the per-dimension dispatch limit.
    // both sides of the grid are bounded by a u32 limit
    #[allow(clippy::cast_possible_truncation)]
    fn dispatch_grid(&self, n_groups: usize) -> Result<(u32, u32)> {
        let max = self.device.limits().max_compute_workgroups_per_dimension as usize;
        let x = n_groups.min(max);
        let y = n_groups.div_ceil(x);
        if y > max {
            return Err(GpuError::InvalidInput(format!(
                "{n_groups} workgroups exceed the dispatch limit of {max}x{max}"
            )));
        }
        Ok((x as u32, y as u32))
    }

    fn storage(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE,
            })
    }

    fn output(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    fn staging(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Map `buffer` for reading, block until the device finishes, and return its contents.
    fn read_back<T: Pod>(&self, buffer: &wgpu::Buffer) -> Result<Vec<T>> {
        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            // the receiver only disappears if we already bailed out
            let _ = tx.send(res);
        });

        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(|_| GpuError::ReadbackCancelled)??;

        let view = slice.get_mapped_range();
        let values = bytemuck::cast_slice::<u8, T>(&view).to_vec();
        drop(view);
        buffer.unmap();
        Ok(values)
    }
}

impl BruteForceKnn for WgpuKnn {
    #[allow(clippy::cast_possible_truncation)]
    fn knn(&self, reference: &[f32], query: &[f32], dim: usize, k: usize) -> Result<KnnOutput> {
        let shape = Shape::resolve(reference, query, dim, k)?;
        if shape.n_query == 0 {
            return Ok(KnnOutput {
                dist: Box::new([]),
                ind: Box::new([]),
            });
        }

        self.check_binding::<f32>("reference set", reference.len())?;
        self.check_binding::<f32>("query set", query.len())?;
        let dist_size = self.check_binding::<f32>("distance output", shape.output_len())?;
        let ind_size = self.check_binding::<u32>("index output", shape.output_len())?;
        for n in [shape.n_query, shape.dim, shape.k] {
            if u32::try_from(n).is_err() {
                return Err(GpuError::InvalidInput(format!("{n} does not fit in a u32")));
            }
        }
        let (groups_x, groups_y) = self.dispatch_grid(shape.n_query.div_ceil(WORKGROUP_SIZE))?;

        debug!(
            n_ref = shape.n_ref,
            n_query = shape.n_query,
            dim = shape.dim,
            k = shape.k,
            groups_x,
            groups_y,
            "dispatching brute-force KNN"
        );

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        // every field was range-checked above
        let params = Params {
            n_ref: shape.n_ref as u32,
            n_query: shape.n_query as u32,
            dim: shape.dim as u32,
            k: shape.k as u32,
        };
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("knn_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let reference = self.storage("knn_reference", bytemuck::cast_slice(reference));
        let query = self.storage("knn_query", bytemuck::cast_slice(query));
        let dist = self.output("knn_dist", dist_size);
        let ind = self.output("knn_ind", ind_size);
        let dist_staging = self.staging("knn_dist_staging", dist_size);
        let ind_staging = self.staging("knn_ind_staging", ind_size);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("knn_bindings"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: reference.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: query.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: dist.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: ind.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("knn_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("knn_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(&dist, 0, &dist_staging, 0, dist_size);
        encoder.copy_buffer_to_buffer(&ind, 0, &ind_staging, 0, ind_size);
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Validation(err.to_string()));
        }

        let dist = self.read_back::<f32>(&dist_staging)?;
        let ind = self.read_back::<u32>(&ind_staging)?;

        Ok(KnnOutput {
            dist: dist.into_boxed_slice(),
            ind: ind.into_boxed_slice(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostKnn;

    /// Open the GPU backend, or `None` if this machine has no usable adapter.
    fn gpu() -> Option<WgpuKnn> {
        match WgpuKnn::new() {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                None
            }
        }
    }

    /// Deterministic pseudo-random coordinates in `[0, 1)`.
    #[allow(clippy::cast_precision_loss)]
    fn coords(n: usize, seed: u64) -> Vec<f32> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                (state >> 40) as f32 / (1u64 << 24) as f32
            })
            .collect()
    }

    #[test]
    fn matches_host() {
        let Some(gpu) = gpu() else { return };
        println!("running on {}", gpu.adapter_name());

        let dim = 16;
        let reference = coords(dim * 500, 1);
        let query = coords(dim * 130, 2);
        let k = 7;

        let expected = HostKnn.knn(&reference, &query, dim, k).unwrap();
        let actual = gpu.knn(&reference, &query, dim, k).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn one_based_indices() {
        let Some(gpu) = gpu() else { return };
        let reference = [0.0, 2.0, 4.0, 6.0];
        let query = [4.5, -1.0];
        let out = gpu.knn(&reference, &query, 1, 2).unwrap();
        assert_eq!(&*out.ind, &[3, 1, 4, 2]);
    }

    #[test]
    fn empty_query_skips_dispatch() {
        let Some(gpu) = gpu() else { return };
        let out = gpu.knn(&[0.0, 1.0], &[], 1, 1).unwrap();
        assert!(out.ind.is_empty());
    }
}
