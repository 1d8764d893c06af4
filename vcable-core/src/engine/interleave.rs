// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Mux/demux between an interleaved ring window and flat channel buffers.
//!
//! No format conversion: samples are copied as opaque `sample_bytes`-wide
//! units. For channel `i`, sample `j` lives at
//! `window[i * sample_bytes + j * channels * sample_bytes..][..sample_bytes]`.

/// Split an interleaved window into one flat buffer per channel.
///
/// Every output must be `window.len() / outputs.len()` bytes long.
pub fn demux<B: AsMut<[u8]>>(window: &[u8], outputs: &mut [B], sample_bytes: usize) {
    let channels = outputs.len();
    if channels == 0 || sample_bytes == 0 {
        return;
    }
    let stride = channels * sample_bytes;
    debug_assert_eq!(window.len() % stride, 0);

    if channels == 1 {
        let out = outputs[0].as_mut();
        out[..window.len()].copy_from_slice(window);
        return;
    }

    for (frame_index, frame) in window.chunks_exact(stride).enumerate() {
        let at = frame_index * sample_bytes;
        for (channel, out) in outputs.iter_mut().enumerate() {
            let src = channel * sample_bytes;
            out.as_mut()[at..at + sample_bytes].copy_from_slice(&frame[src..src + sample_bytes]);
        }
    }
}

/// Interleave one flat buffer per channel into a window.
///
/// The inverse of [`demux`].
pub fn mux<B: AsRef<[u8]>>(inputs: &[B], window: &mut [u8], sample_bytes: usize) {
    let channels = inputs.len();
    if channels == 0 || sample_bytes == 0 {
        return;
    }
    let stride = channels * sample_bytes;
    debug_assert_eq!(window.len() % stride, 0);

    if channels == 1 {
        let len = window.len();
        window.copy_from_slice(&inputs[0].as_ref()[..len]);
        return;
    }

    for (frame_index, frame) in window.chunks_exact_mut(stride).enumerate() {
        let at = frame_index * sample_bytes;
        for (channel, input) in inputs.iter().enumerate() {
            let dst = channel * sample_bytes;
            frame[dst..dst + sample_bytes].copy_from_slice(&input.as_ref()[at..at + sample_bytes]);
        }
    }
}
