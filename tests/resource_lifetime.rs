mod common;

use common::Fixture;
use pipestate::*;

fn host_buffer(f: &mut Fixture, data: &[u32]) -> Buffer {
    let buffer = f
        .ctx
        .create_buffer(&BufferInfo {
            debug_name: "staging",
            byte_size: (data.len() * 4) as u64,
            visibility: MemoryVisibility::CpuAndGpu,
            usage: BufferUsage::UNIFORM,
            initial_data: Some(bytemuck::cast_slice(data)),
        })
        .unwrap();
    f.log.clear();
    buffer
}

#[test]
fn destroy_invalidates_every_clone() {
    let mut f = Fixture::new();
    let before = f.ctx.live_resource_count();
    let buffer = f.vertex_buffer(256);
    let copy = buffer.clone();
    assert_eq!(buffer.ref_count(), 2);
    assert_eq!(f.ctx.live_resource_count(), before + 1);

    copy.destroy();
    assert!(!buffer.is_valid());
    assert!(!copy.is_valid());
    assert_eq!(buffer.native(), Err(GpuError::InvalidArgument));
    assert_eq!(f.ctx.live_resource_count(), before);
    assert_eq!(f.log.count("delete_buffer"), 1);

    // Neither a second destroy nor the last drop releases it again.
    buffer.destroy();
    drop(buffer);
    drop(copy);
    assert_eq!(f.ctx.live_resource_count(), before);
    assert_eq!(f.log.count("delete_buffer"), 1);
}

#[test]
fn dropping_the_last_handle_releases() {
    let mut f = Fixture::new();
    let before = f.ctx.live_resource_count();
    let buffer = f.vertex_buffer(64);
    let copy = buffer.clone();

    drop(buffer);
    assert!(copy.is_valid());
    assert_eq!(f.ctx.live_resource_count(), before + 1);

    drop(copy);
    assert_eq!(f.log.count("delete_buffer"), 0);
    assert_eq!(f.ctx.live_resource_count(), before);
    assert_eq!(f.log.count("delete_buffer"), 1);
}

#[test]
fn destroy_waits_for_the_next_synchronization_point() {
    let mut f = Fixture::new();
    let before = f.ctx.live_resource_count();
    let queued = f.vertex_buffer(64);
    let immediate = f.vertex_buffer(64);

    queued.destroy();
    assert!(!queued.is_valid());
    assert_eq!(f.log.count("delete_buffer"), 0);

    f.ctx.destroy_resource(&immediate);
    assert!(!immediate.is_valid());
    // Both queued releases were drained.
    assert_eq!(f.log.count("delete_buffer"), 2);
    assert_eq!(f.ctx.live_resource_count(), before);
}

#[test]
fn released_resources_cannot_be_recorded() {
    let mut f = Fixture::new();
    let buffer = f.vertex_buffer(64);
    buffer.destroy();

    let mut rec = f.ctx.immediate().unwrap();
    assert_eq!(
        rec.bind_vertex_buffer(0, &buffer, 0),
        Err(GpuError::InvalidArgument)
    );
    assert_eq!(
        rec.update_buffer(&buffer, 0, &[0; 4]),
        Err(GpuError::InvalidArgument)
    );
}

#[test]
fn commands_on_resources_released_after_recording_are_skipped() {
    let mut f = Fixture::new();
    let buffer = f.vertex_buffer(64);

    let mut cmd = CommandBuffer::primary("stale");
    cmd.begin().unwrap();
    cmd.update_buffer(&buffer, 0, &[1, 2, 3, 4]).unwrap();
    cmd.set_line_width(2.0).unwrap();
    cmd.end().unwrap();

    buffer.destroy();
    f.log.clear();
    f.ctx.submit(&mut cmd, &SubmitInfo::default()).unwrap();
    assert_eq!(f.log.count("buffer_sub_data"), 0);
    assert_eq!(f.log.count("line_width"), 1);
}

#[test]
fn mapped_buffers_show_their_contents() {
    let mut f = Fixture::new();
    let buffer = host_buffer(&mut f, &[1, 2, 3, 4]);

    {
        let words = f.ctx.map_buffer::<u32>(&buffer).unwrap();
        assert_eq!(words.to_vec(), vec![1, 2, 3, 4]);
        words[3] = 40;
    }
    assert!(buffer.desc().is_mapped());
    assert_eq!(
        f.ctx.map_buffer::<u32>(&buffer).err(),
        Some(GpuError::InvalidArgument)
    );

    f.ctx.unmap_buffer(&buffer).unwrap();
    assert!(!buffer.desc().is_mapped());
    assert_eq!(f.ctx.unmap_buffer(&buffer), Err(GpuError::InvalidArgument));

    let words = f.ctx.map_buffer::<u32>(&buffer).unwrap();
    assert_eq!(words[3], 40);
    f.ctx.unmap_buffer(&buffer).unwrap();
}

#[test]
fn mapping_needs_host_visible_memory() {
    let mut f = Fixture::new();
    let device_only = f
        .ctx
        .create_buffer(&BufferInfo {
            debug_name: "device",
            visibility: MemoryVisibility::Gpu,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(
        f.ctx.map_buffer::<u8>(&device_only).err(),
        Some(GpuError::UnsupportedRequest)
    );

    let odd = f
        .ctx
        .create_buffer(&BufferInfo {
            debug_name: "odd",
            byte_size: 6,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(
        f.ctx.map_buffer::<u32>(&odd).err(),
        Some(GpuError::InvalidArgument)
    );
    // A failed view leaves the buffer unmapped.
    assert!(!odd.desc().is_mapped());
}

#[test]
fn buffer_creation_checks_its_parameters() {
    let mut f = Fixture::new();
    let empty = f.ctx.create_buffer(&BufferInfo {
        byte_size: 0,
        ..Default::default()
    });
    assert_eq!(empty.err(), Some(GpuError::InvalidArgument));

    let overfull = f.ctx.create_buffer(&BufferInfo {
        byte_size: 2,
        initial_data: Some(&[0; 4]),
        ..Default::default()
    });
    assert_eq!(overfull.err(), Some(GpuError::InvalidArgument));
}

#[test]
fn resources_die_with_their_context() {
    let mut f = Fixture::new();
    let buffer = f.vertex_buffer(64);
    let shader = f.vertex.clone();
    drop(f);

    assert!(!buffer.is_valid());
    assert!(!shader.is_valid());
    assert_eq!(buffer.native(), Err(GpuError::InvalidArgument));
    // Nothing left to release into.
    buffer.destroy();
}
