//! Shared memory for the audio fast lane.
//!
//! One file-backed segment per plugin instance. The first page is a header
//! recording the negotiated layout; the rest is a flat array of per-bus,
//! per-channel sample runs at offsets computed once from that layout. No
//! pointer fixup is ever needed across processes, and no lock either: the
//! request/ack round-trip on the process channel linearises all access.

use crate::error::{BridgeError, Result};
use crate::protocol::AudioShmConfig;
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::PathBuf;

const HEADER_MAGIC: u32 = 0x56_42_53_4d; // "VBSM"

/// Header page size. Keeps the first sample run page aligned.
const HEADER_CAPACITY: usize = 4096;

/// Uses `UnsafeCell` for interior mutability since the mapped region is
/// shared between processes and written through an immutable reference.
/// Sound because exactly one side touches the buffer at a time: the stub
/// before sending the audio request and after receiving the ack, the host
/// process only while servicing a request.
pub struct AudioShmBuffer {
    mmap: UnsafeCell<MmapMut>,
    config: AudioShmConfig,
    input_offsets: Vec<Vec<usize>>,
    output_offsets: Vec<Vec<usize>>,
    /// Creator unlinks the backing file on drop.
    owns_memory: bool,
}

// SAFETY: see the struct docs; the single-writer protocol is enforced by the
// audio round-trip, the same way the OS-level sharing already works.
unsafe impl Send for AudioShmBuffer {}
unsafe impl Sync for AudioShmBuffer {}

impl AudioShmBuffer {
    /// Create the segment and write the layout header. Used by the side that
    /// computed the layout.
    pub fn create(config: AudioShmConfig) -> Result<Self> {
        Self::map(config, true)
    }

    /// Map an existing segment and verify its header against `config`.
    pub fn open(config: AudioShmConfig) -> Result<Self> {
        let buffer = Self::map(config, false)?;
        buffer.verify_header()?;
        Ok(buffer)
    }

    /// Re-layout the buffer after a bus reconfiguration. Only permitted while
    /// audio is disabled on both sides; the caller coordinates that.
    pub fn resize(&mut self, config: AudioShmConfig) -> Result<()> {
        let replacement = Self::map(config, self.owns_memory)?;
        let mut old = std::mem::replace(self, replacement);
        // The backing file now belongs to the new mapping; the old value must
        // not unlink it on drop.
        old.owns_memory = false;
        Ok(())
    }

    fn map(config: AudioShmConfig, create: bool) -> Result<Self> {
        if config.element_size != 4 && config.element_size != 8 {
            return Err(BridgeError::SharedMemory(format!(
                "unsupported element size {}",
                config.element_size
            )));
        }

        let (input_offsets, output_offsets, total_size) = compute_layout(&config);
        let path = shm_path(&config.name);

        let file = if create {
            use std::os::unix::fs::OpenOptionsExt;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)
                .map_err(|e| {
                    BridgeError::SharedMemory(format!("could not create {}: {e}", path.display()))
                })?;
            file.set_len(total_size as u64)
                .map_err(|e| BridgeError::SharedMemory(format!("could not size segment: {e}")))?;
            file
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| {
                    BridgeError::SharedMemory(format!("could not open {}: {e}", path.display()))
                })?
        };

        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| BridgeError::SharedMemory(format!("could not map segment: {e}")))?;
        if mmap.len() < total_size {
            return Err(BridgeError::SharedMemory(format!(
                "segment is {} bytes, layout needs {total_size}",
                mmap.len()
            )));
        }

        let buffer = Self {
            mmap: UnsafeCell::new(mmap),
            config,
            input_offsets,
            output_offsets,
            owns_memory: create,
        };
        if create {
            buffer.write_header();
        }
        Ok(buffer)
    }

    fn write_header(&self) {
        let mut words: Vec<u32> = vec![
            HEADER_MAGIC,
            self.config.element_size,
            self.config.block_size,
            self.config.input_channels.len() as u32,
            self.config.output_channels.len() as u32,
        ];
        words.extend(self.config.input_channels.iter());
        words.extend(self.config.output_channels.iter());

        let mmap = unsafe { &mut *self.mmap.get() };
        for (i, word) in words.iter().enumerate() {
            mmap[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    fn verify_header(&self) -> Result<()> {
        let mmap = unsafe { &*self.mmap.get() };
        let word = |i: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&mmap[i * 4..i * 4 + 4]);
            u32::from_le_bytes(bytes)
        };

        let matches = word(0) == HEADER_MAGIC
            && word(1) == self.config.element_size
            && word(2) == self.config.block_size
            && word(3) == self.config.input_channels.len() as u32
            && word(4) == self.config.output_channels.len() as u32;
        if !matches {
            return Err(BridgeError::SharedMemory(
                "segment header does not match the negotiated layout".into(),
            ));
        }
        Ok(())
    }

    pub fn config(&self) -> &AudioShmConfig {
        &self.config
    }

    /// Runs are sized for the largest precision the plugin can process, so a
    /// single-precision block may travel through a double-sized layout.
    fn check_element<T>(&self) -> Result<()> {
        if std::mem::size_of::<T>() > self.config.element_size as usize {
            return Err(BridgeError::SharedMemory(format!(
                "element size mismatch: buffer holds {} byte samples",
                self.config.element_size
            )));
        }
        Ok(())
    }

    fn offset(&self, offsets: &[Vec<usize>], bus: usize, channel: usize) -> Result<usize> {
        offsets
            .get(bus)
            .and_then(|bus_offsets| bus_offsets.get(channel))
            .copied()
            .ok_or_else(|| {
                BridgeError::SharedMemory(format!("bus {bus} channel {channel} out of bounds"))
            })
    }

    /// Copy one channel of host-provided input samples into its run.
    pub fn write_input<T: Copy>(&self, bus: usize, channel: usize, data: &[T]) -> Result<()> {
        let offset = self.offset(&self.input_offsets, bus, channel)?;
        self.write_run(offset, data)
    }

    /// Copy one output channel run back into a host-provided buffer.
    pub fn read_output_into<T: Copy>(
        &self,
        bus: usize,
        channel: usize,
        output: &mut [T],
    ) -> Result<()> {
        let offset = self.offset(&self.output_offsets, bus, channel)?;
        self.read_run(offset, output)
    }

    /// Copy one channel of plugin output into its run (host-process side).
    pub fn write_output<T: Copy>(&self, bus: usize, channel: usize, data: &[T]) -> Result<()> {
        let offset = self.offset(&self.output_offsets, bus, channel)?;
        self.write_run(offset, data)
    }

    /// Copy one input channel run out (host-process side).
    pub fn read_input_into<T: Copy>(
        &self,
        bus: usize,
        channel: usize,
        output: &mut [T],
    ) -> Result<()> {
        let offset = self.offset(&self.input_offsets, bus, channel)?;
        self.read_run(offset, output)
    }

    /// Raw pointer to an input channel run, for handing to the plugin's
    /// processing call without an intermediate copy.
    pub fn input_ptr<T: Copy>(&self, bus: usize, channel: usize) -> Result<*mut T> {
        self.check_element::<T>()?;
        let offset = self.offset(&self.input_offsets, bus, channel)?;
        let mmap = unsafe { &mut *self.mmap.get() };
        Ok(unsafe { mmap.as_mut_ptr().add(offset) as *mut T })
    }

    /// Raw pointer to an output channel run.
    pub fn output_ptr<T: Copy>(&self, bus: usize, channel: usize) -> Result<*mut T> {
        self.check_element::<T>()?;
        let offset = self.offset(&self.output_offsets, bus, channel)?;
        let mmap = unsafe { &mut *self.mmap.get() };
        Ok(unsafe { mmap.as_mut_ptr().add(offset) as *mut T })
    }

    fn write_run<T: Copy>(&self, offset: usize, data: &[T]) -> Result<()> {
        self.check_element::<T>()?;
        if data.len() > self.config.block_size as usize {
            return Err(BridgeError::SharedMemory(format!(
                "{} frames exceed the {} frame block size",
                data.len(),
                self.config.block_size
            )));
        }

        let bytes = std::mem::size_of_val(data);
        let mmap = unsafe { &mut *self.mmap.get() };
        let source = unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, bytes) };
        mmap[offset..offset + bytes].copy_from_slice(source);
        Ok(())
    }

    fn read_run<T: Copy>(&self, offset: usize, output: &mut [T]) -> Result<()> {
        self.check_element::<T>()?;
        if output.len() > self.config.block_size as usize {
            return Err(BridgeError::SharedMemory(format!(
                "{} frames exceed the {} frame block size",
                output.len(),
                self.config.block_size
            )));
        }

        let bytes = std::mem::size_of_val(output);
        let mmap = unsafe { &*self.mmap.get() };
        let target =
            unsafe { std::slice::from_raw_parts_mut(output.as_mut_ptr() as *mut u8, bytes) };
        target.copy_from_slice(&mmap[offset..offset + bytes]);
        Ok(())
    }
}

impl Drop for AudioShmBuffer {
    fn drop(&mut self) {
        if self.owns_memory {
            let _ = std::fs::remove_file(shm_path(&self.config.name));
        }
    }
}

/// Byte offsets for every channel run, inputs first, plus the total segment
/// size. Offsets are stable for the lifetime of one configuration.
fn compute_layout(config: &AudioShmConfig) -> (Vec<Vec<usize>>, Vec<Vec<usize>>, usize) {
    let run_bytes = config.block_size as usize * config.element_size as usize;
    let mut next = HEADER_CAPACITY;
    let mut place_buses = |channel_counts: &[u32]| -> Vec<Vec<usize>> {
        channel_counts
            .iter()
            .map(|&channels| {
                (0..channels)
                    .map(|_| {
                        let offset = next;
                        next += run_bytes;
                        offset
                    })
                    .collect()
            })
            .collect()
    };

    let input_offsets = place_buses(&config.input_channels);
    let output_offsets = place_buses(&config.output_channels);
    (input_offsets, output_offsets, next)
}

fn shm_path(name: &str) -> PathBuf {
    PathBuf::from("/dev/shm").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(suffix: &str) -> AudioShmConfig {
        AudioShmConfig {
            name: format!("vinebridge-test-{}-{suffix}", std::process::id()),
            input_channels: vec![2],
            output_channels: vec![2],
            element_size: 4,
            block_size: 64,
        }
    }

    #[test]
    fn passthrough_block_reads_back_exactly() {
        let config = test_config("roundtrip");
        let stub_side = AudioShmBuffer::create(config.clone()).unwrap();
        let host_side = AudioShmBuffer::open(config).unwrap();

        let left = [1.0f32; 64];
        let right = [-1.0f32; 64];
        stub_side.write_input(0, 0, &left).unwrap();
        stub_side.write_input(0, 1, &right).unwrap();

        // A pass-through plugin: copy inputs to outputs on the host side.
        let mut scratch = [0.0f32; 64];
        for channel in 0..2 {
            host_side.read_input_into(0, channel, &mut scratch).unwrap();
            host_side.write_output(0, channel, &scratch).unwrap();
        }

        let mut out = [0.0f32; 64];
        stub_side.read_output_into(0, 0, &mut out).unwrap();
        assert_eq!(out, left);
        stub_side.read_output_into(0, 1, &mut out).unwrap();
        assert_eq!(out, right);
    }

    #[test]
    fn offsets_are_stable_across_blocks() {
        let config = test_config("offsets");
        let buffer = AudioShmBuffer::create(config).unwrap();

        let first = (
            buffer.input_ptr::<f32>(0, 0).unwrap(),
            buffer.input_ptr::<f32>(0, 1).unwrap(),
        );
        for _ in 0..3 {
            buffer.write_input(0, 0, &[0.5f32; 64]).unwrap();
            buffer.write_input(0, 1, &[0.5f32; 64]).unwrap();
        }
        let second = (
            buffer.input_ptr::<f32>(0, 0).unwrap(),
            buffer.input_ptr::<f32>(0, 1).unwrap(),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn channels_do_not_alias() {
        let config = AudioShmConfig {
            name: format!("vinebridge-test-{}-alias", std::process::id()),
            input_channels: vec![2, 1],
            output_channels: vec![2],
            element_size: 8,
            block_size: 32,
        };
        let buffer = AudioShmBuffer::create(config).unwrap();

        buffer.write_input(0, 0, &[1.0f64; 32]).unwrap();
        buffer.write_input(0, 1, &[2.0f64; 32]).unwrap();
        buffer.write_input(1, 0, &[3.0f64; 32]).unwrap();
        buffer.write_output(0, 0, &[4.0f64; 32]).unwrap();

        let mut out = [0.0f64; 32];
        buffer.read_input_into(0, 0, &mut out).unwrap();
        assert_eq!(out, [1.0; 32]);
        buffer.read_input_into(0, 1, &mut out).unwrap();
        assert_eq!(out, [2.0; 32]);
        buffer.read_input_into(1, 0, &mut out).unwrap();
        assert_eq!(out, [3.0; 32]);
    }

    #[test]
    fn rejects_out_of_bounds_and_wrong_element() {
        let config = test_config("bounds");
        let buffer = AudioShmBuffer::create(config).unwrap();

        assert!(buffer.write_input(0, 2, &[0.0f32; 64]).is_err());
        assert!(buffer.write_input(1, 0, &[0.0f32; 64]).is_err());
        assert!(buffer.write_input(0, 0, &[0.0f32; 128]).is_err());
        assert!(buffer.write_input(0, 0, &[0.0f64; 32]).is_err());
    }

    #[test]
    fn open_rejects_mismatched_layout() {
        let config = test_config("mismatch");
        let _owner = AudioShmBuffer::create(config.clone()).unwrap();

        let mut other = config;
        other.block_size = 32;
        assert!(AudioShmBuffer::open(other).is_err());
    }

    #[test]
    fn owner_unlinks_segment_on_drop() {
        let config = test_config("unlink");
        let path = shm_path(&config.name);
        let buffer = AudioShmBuffer::create(config).unwrap();
        assert!(path.exists());
        drop(buffer);
        assert!(!path.exists());
    }
}
