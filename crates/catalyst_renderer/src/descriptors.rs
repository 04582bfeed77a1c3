use ash::vk;

use crate::error::RenderResult;

/// Share of each descriptor type per set, scaled by the set count when a
/// pool is created.
#[derive(Clone, Copy, Debug)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

/// The pool operations the allocator needs. Implemented for the real
/// device and for an in-memory mock in tests.
pub trait DescriptorPoolBackend {
    fn create_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<vk::DescriptorPool>;

    /// Returns the raw result so the caller can react to pool exhaustion.
    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result>;

    fn reset_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()>;

    fn destroy_pool(&self, pool: vk::DescriptorPool);
}

impl DescriptorPoolBackend for ash::Device {
    fn create_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        Ok(unsafe { self.create_descriptor_pool(&info, None)? })
    }

    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.allocate_descriptor_sets(&info) }.map(|sets| sets[0])
    }

    fn reset_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()> {
        unsafe { self.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())? };
        Ok(())
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.destroy_descriptor_pool(pool, None) };
    }
}

/// Pool-of-pools. Exhausted pools move to `full` and are replaced by a new
/// pool of the same size, never grown in place.
#[derive(Debug, Default)]
pub struct DescriptorAllocator {
    ratios: Vec<PoolSizeRatio>,
    sets_per_pool: u32,
    ready: Vec<vk::DescriptorPool>,
    full: Vec<vk::DescriptorPool>,
}

impl DescriptorAllocator {
    /// Pool sizing is fixed here for the allocator's whole lifetime.
    pub fn new(
        backend: &impl DescriptorPoolBackend,
        sets_per_pool: u32,
        ratios: &[PoolSizeRatio],
    ) -> RenderResult<Self> {
        let mut allocator = Self {
            ratios: ratios.to_vec(),
            sets_per_pool: sets_per_pool.max(1),
            ready: Vec::new(),
            full: Vec::new(),
        };
        let pool = allocator.create_pool(backend)?;
        allocator.ready.push(pool);
        Ok(allocator)
    }

    pub fn pool_count(&self) -> usize {
        self.ready.len() + self.full.len()
    }

    pub fn allocate(
        &mut self,
        backend: &impl DescriptorPoolBackend,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet> {
        let mut pool = self.get_pool(backend)?;

        let set = match backend.allocate_set(pool, layout) {
            Ok(set) => set,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.full.push(pool);
                pool = self.get_pool(backend)?;
                log::debug!(
                    "Descriptor pool exhausted, now using {} pools",
                    self.pool_count() + 1
                );
                match backend.allocate_set(pool, layout) {
                    Ok(set) => set,
                    Err(e) => {
                        self.ready.push(pool);
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.ready.push(pool);
                return Err(e.into());
            }
        };

        self.ready.push(pool);
        Ok(set)
    }

    /// Resets every pool and makes them all available again. Sets handed
    /// out earlier become invalid.
    pub fn reset_pools(&mut self, backend: &impl DescriptorPoolBackend) -> RenderResult<()> {
        for &pool in &self.ready {
            backend.reset_pool(pool)?;
        }
        for pool in self.full.drain(..) {
            backend.reset_pool(pool)?;
            self.ready.push(pool);
        }
        Ok(())
    }

    pub fn destroy_pools(&mut self, backend: &impl DescriptorPoolBackend) {
        for pool in self.ready.drain(..).chain(self.full.drain(..)) {
            backend.destroy_pool(pool);
        }
    }

    fn get_pool(&mut self, backend: &impl DescriptorPoolBackend) -> RenderResult<vk::DescriptorPool> {
        match self.ready.pop() {
            Some(pool) => Ok(pool),
            None => self.create_pool(backend),
        }
    }

    fn create_pool(&self, backend: &impl DescriptorPoolBackend) -> RenderResult<vk::DescriptorPool> {
        let sizes: Vec<vk::DescriptorPoolSize> = self
            .ratios
            .iter()
            .map(|r| vk::DescriptorPoolSize {
                ty: r.ty,
                descriptor_count: ((r.ratio * self.sets_per_pool as f32).ceil() as u32).max(1),
            })
            .collect();
        backend.create_pool(self.sets_per_pool, &sizes)
    }
}

/// Batches descriptor writes so the info arrays outlive the write structs.
#[derive(Default)]
pub struct DescriptorWriter {
    buffer_writes: Vec<(u32, vk::DescriptorType, vk::DescriptorBufferInfo)>,
    image_writes: Vec<(u32, vk::DescriptorType, Vec<vk::DescriptorImageInfo>)>,
}

impl DescriptorWriter {
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.buffer_writes.push((
            binding,
            ty,
            vk::DescriptorBufferInfo {
                buffer,
                offset,
                range: size,
            },
        ));
        self
    }

    pub fn write_images(
        &mut self,
        binding: u32,
        images: Vec<vk::DescriptorImageInfo>,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.image_writes.push((binding, ty, images));
        self
    }

    pub fn update_set(&self, device: &ash::Device, set: vk::DescriptorSet) {
        let mut writes: Vec<vk::WriteDescriptorSet> = self
            .buffer_writes
            .iter()
            .map(|(binding, ty, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect();
        writes.extend(
            self.image_writes
                .iter()
                .filter(|(_, _, infos)| !infos.is_empty())
                .map(|(binding, ty, infos)| {
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(*binding)
                        .descriptor_type(*ty)
                        .image_info(infos)
                }),
        );

        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}

/// Collects bindings for one set layout.
#[derive(Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn add_binding(&mut self, binding: u32, ty: vk::DescriptorType, count: u32) -> &mut Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(count),
        );
        self
    }

    pub fn build(
        &mut self,
        device: &ash::Device,
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        for binding in &mut self.bindings {
            binding.stage_flags |= stages;
        }
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        Ok(unsafe { device.create_descriptor_set_layout(&info, None)? })
    }
}
