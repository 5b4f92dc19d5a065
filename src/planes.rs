//! Non-interleaved PCM plane helpers shared by the sender and receiver.
//!
//! A "plane" array is `planes[channel][sample]`, each channel a contiguous
//! slice of floats in `[-1.0, 1.0]`. This mirrors the producer/consumer
//! contract in spec.md section 4.6 without pulling in a full audio-buffer
//! abstraction, which belongs to the host's audio engine, not this crate.

/// Read-only view over non-interleaved PCM channel planes.
pub type Planes<'a> = &'a [&'a [f32]];

/// Mutable view over non-interleaved PCM channel planes, to be filled by a
/// decode call.
pub type PlanesMut<'a> = &'a mut [&'a mut [f32]];

/// Validate that every channel plane has exactly `samples` elements.
pub fn validate_plane_lengths(planes: &[&[f32]], samples: usize) -> bool {
    planes.iter().all(|plane| plane.len() == samples)
}

/// Validate that every mutable channel plane has exactly `samples` elements.
pub fn validate_plane_lengths_mut(planes: &[&mut [f32]], samples: usize) -> bool {
    planes.iter().all(|plane| plane.len() == samples)
}
