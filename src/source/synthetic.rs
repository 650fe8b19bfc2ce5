use image::RgbImage;

use super::Read;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Moving gradient pattern for bench runs without a camera (`stub://`).
pub(crate) struct SyntheticSource {
    limit: Option<u64>,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub(crate) fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub(crate) fn next_image(&mut self) -> Read {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Read::End;
        }
        self.frame_count += 1;
        // Shift the scene every 50 frames.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let offset = self.frame_count + self.scene_state as u64;
        Read::Frame(RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let base = (x as u64 + y as u64 + offset) % 256;
            image::Rgb([base as u8, (base / 2) as u8, (255 - base) as u8])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_the_requested_count() {
        let mut source = SyntheticSource::new(Some(2));
        assert!(matches!(source.next_image(), Read::Frame(_)));
        assert!(matches!(source.next_image(), Read::Frame(_)));
        assert!(matches!(source.next_image(), Read::End));
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = SyntheticSource::new(None);
        let (Read::Frame(a), Read::Frame(b)) = (source.next_image(), source.next_image()) else {
            panic!("synthetic source ended");
        };
        assert_eq!(a.dimensions(), (WIDTH, HEIGHT));
        assert_ne!(a.as_raw(), b.as_raw());
    }
}
