//! Ordered acquisition of decoder codec locks.
//!
//! Whenever more than one codec lock is held at a time they are taken here,
//! always video, then audio, then subtitles.

use vela_common::MediaKind;
use vela_decoder::{CodecGuard, Decoder};

/// Codec locks of the three playback decoders, held together.
pub struct CodecLocks<'a> {
    video: CodecGuard<'a>,
    audio: CodecGuard<'a>,
    subtitles: CodecGuard<'a>,
}

impl<'a> CodecLocks<'a> {
    /// Acquire all three locks in canonical order.
    pub fn acquire(video: &'a Decoder, audio: &'a Decoder, subtitles: &'a Decoder) -> Self {
        debug_assert_eq!(video.kind(), MediaKind::Video);
        debug_assert_eq!(audio.kind(), MediaKind::Audio);
        debug_assert_eq!(subtitles.kind(), MediaKind::Subtitle);

        let video = video.lock_codec();
        let audio = audio.lock_codec();
        let subtitles = subtitles.lock_codec();
        Self {
            video,
            audio,
            subtitles,
        }
    }

    /// Guard of the decoder for `kind`.
    pub fn guard(&mut self, kind: MediaKind) -> &mut CodecGuard<'a> {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
            MediaKind::Subtitle => &mut self.subtitles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use vela_common::DecoderSettings;
    use vela_synthetic::SyntheticBackend;

    fn decoders() -> [Arc<Decoder>; 3] {
        let backend = Arc::new(SyntheticBackend::new());
        let settings = DecoderSettings::default();
        MediaKind::ALL.map(|kind| Arc::new(Decoder::new(kind, backend.clone(), &settings)))
    }

    #[test]
    fn guards_map_to_their_kind() {
        let [v, a, s] = decoders();
        let mut locks = CodecLocks::acquire(&v, &a, &s);
        for kind in MediaKind::ALL {
            assert!(!locks.guard(kind).is_open());
        }
    }

    #[test]
    fn concurrent_acquisition_does_not_deadlock() {
        let [v, a, s] = decoders();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (v, a, s) = (v.clone(), a.clone(), s.clone());
                thread::spawn(move || {
                    for _ in 0..200 {
                        let _locks = CodecLocks::acquire(&v, &a, &s);
                    }
                })
            })
            .collect();
        // Single-lock users interleave with the full set.
        for _ in 0..200 {
            let _audio = a.lock_codec();
            thread::sleep(Duration::from_micros(10));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
