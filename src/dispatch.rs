//! Compute pipeline construction and one-shot dispatch.
//!
//! Resources come in two bundles that start out as null handles and fill in
//! as creation steps succeed. Neither `build_pipeline` nor `dispatch`
//! releases anything on failure; the caller tears both bundles down through
//! [`CommandResources::destroy_with`] and [`PipelineResources::destroy_with`]
//! on every path, which walks the documented reverse order regardless of how
//! far creation got.

use std::ffi::CStr;

use ash::vk;

use crate::device::Device;
use crate::util::LeakBomb;
use crate::Error;

/// Workgroups dispatched along X (Y and Z stay 1). Must match the
/// `local_size_x` declared by the shaders; the two constants are coupled by
/// hand.
pub const GROUP_COUNT_X: u32 = 512;

/// Shader module, layout, and pipeline for a single compute stage.
///
/// Created front to back by [`build_pipeline`]; destroyed back to front by
/// [`PipelineResources::destroy_with`].
pub struct PipelineResources {
    bomb: LeakBomb,
    shader_module: vk::ShaderModule,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl PipelineResources {
    pub fn empty() -> PipelineResources {
        PipelineResources {
            bomb: LeakBomb::armed("PipelineResources"),
            shader_module: vk::ShaderModule::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        }
    }

    /// Destroys whichever pipeline objects exist, pipeline first and shader
    /// module last.
    pub fn destroy_with(mut self, device: &Device) {
        self.bomb.disarm();

        // Safety: the handles were created on this device and are not used
        // again; destroying a null handle is a valid no-op.
        unsafe {
            device.handle().destroy_pipeline(self.pipeline, None);
            device.handle().destroy_pipeline_layout(self.layout, None);
            device.handle().destroy_shader_module(self.shader_module, None);
        }
    }
}

/// Command pool and the single buffer allocated from it, scoped to one
/// dispatch.
pub struct CommandResources {
    bomb: LeakBomb,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl CommandResources {
    pub fn empty() -> CommandResources {
        CommandResources {
            bomb: LeakBomb::armed("CommandResources"),
            pool: vk::CommandPool::null(),
            buffer: vk::CommandBuffer::null(),
        }
    }

    /// Frees the command buffer before destroying the pool it came from.
    pub fn destroy_with(mut self, device: &Device) {
        self.bomb.disarm();

        // Safety: buffer and pool were created on this device and are not
        // used again. A buffer handle implies its pool exists, and
        // destroying a null pool is a valid no-op.
        unsafe {
            if self.buffer != vk::CommandBuffer::null() {
                device.handle().free_command_buffers(self.pool, &[self.buffer]);
            }

            device.handle().destroy_command_pool(self.pool, None);
        }
    }
}

/// Builds the pipeline bundle from a precompiled SPIR-V word blob.
///
/// The blob's content is not inspected; garbage surfaces as a
/// module-creation error from the driver. The layout is empty because the
/// shaders take no descriptors and no push constants. The first failing call
/// aborts with that call's error, leaving `resources` holding whatever was
/// created so far.
pub fn build_pipeline(
    device: &Device,
    code: &[u32],
    resources: &mut PipelineResources,
) -> Result<(), Error> {
    let module_info = vk::ShaderModuleCreateInfo::builder().code(code);

    // Safety: create-info pointers outlive each call.
    resources.shader_module = unsafe { device.handle().create_shader_module(&module_info, None) }
        .map_err(|err| Error::vulkan("vkCreateShaderModule", err))?;

    let layout_info = vk::PipelineLayoutCreateInfo::builder();

    resources.layout = unsafe { device.handle().create_pipeline_layout(&layout_info, None) }
        .map_err(|err| Error::vulkan("vkCreatePipelineLayout", err))?;

    let entry_point = CStr::from_bytes_with_nul(b"main\0").unwrap();
    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(resources.shader_module)
        .name(entry_point)
        .build();

    let pipeline_info = vk::ComputePipelineCreateInfo::builder()
        .stage(stage)
        .layout(resources.layout)
        .build();

    let pipelines = unsafe {
        device
            .handle()
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, err)| Error::vulkan("vkCreateComputePipelines", err))?;
    resources.pipeline = pipelines[0];

    Ok(())
}

/// Records and submits one dispatch, then blocks until the queue drains.
///
/// A fresh pool scoped to the queue family backs a single one-time-submit
/// primary buffer. The wait is a full barrier with no fence and no timeout:
/// the call does not return until the device is done, which is the one
/// blocking point in the whole harness.
pub fn dispatch(
    device: &Device,
    queue_family_index: u32,
    resources: &PipelineResources,
    commands: &mut CommandResources,
) -> Result<(), Error> {
    let pool_info = vk::CommandPoolCreateInfo::builder().queue_family_index(queue_family_index);

    // Safety: create-info and record-state requirements are met call by
    // call; the buffer moves pending → invalid only after the wait below.
    commands.pool = unsafe { device.handle().create_command_pool(&pool_info, None) }
        .map_err(|err| Error::vulkan("vkCreateCommandPool", err))?;

    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(commands.pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    commands.buffer = unsafe { device.handle().allocate_command_buffers(&alloc_info) }
        .map_err(|err| Error::vulkan("vkAllocateCommandBuffers", err))?[0];

    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe { device.handle().begin_command_buffer(commands.buffer, &begin_info) }
        .map_err(|err| Error::vulkan("vkBeginCommandBuffer", err))?;

    unsafe {
        device.handle().cmd_bind_pipeline(
            commands.buffer,
            vk::PipelineBindPoint::COMPUTE,
            resources.pipeline,
        );
        device
            .handle()
            .cmd_dispatch(commands.buffer, GROUP_COUNT_X, 1, 1);
    }

    unsafe { device.handle().end_command_buffer(commands.buffer) }
        .map_err(|err| Error::vulkan("vkEndCommandBuffer", err))?;

    // Safety: queue 0 of this family was requested at device creation.
    let queue = unsafe { device.handle().get_device_queue(queue_family_index, 0) };

    let command_buffers = [commands.buffer];
    let submit_info = vk::SubmitInfo::builder()
        .command_buffers(&command_buffers)
        .build();

    unsafe {
        device
            .handle()
            .queue_submit(queue, &[submit_info], vk::Fence::null())
    }
    .map_err(|err| Error::vulkan("vkQueueSubmit", err))?;

    unsafe { device.handle().queue_wait_idle(queue) }
        .map_err(|err| Error::vulkan("vkQueueWaitIdle", err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pins the host-side constant; the shaders declare local_size_x = 512
    // and a silent change here would desynchronize the two.
    #[test]
    fn group_count_matches_shader_local_size() {
        assert_eq!(GROUP_COUNT_X, 512);
    }
}

