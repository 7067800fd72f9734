//! Shared fixtures: agent bundles written to a temporary directory

#![allow(dead_code)]

use std::path::Path;

use image::{Rgba, RgbaImage};

/// Write `<agents_dir>/<name>/{agent.json,map.png}`
///
/// The atlas holds two 4x4 frames side by side: red at (0,0), blue at (4,0).
/// Animations:
/// - `Greeting`: red, blue, red with an exit branch to frame 3, which has
///   no image
/// - `Idle`: one red frame of `idle_ms`
pub fn write_bundle(agents_dir: &Path, name: &str, idle_ms: u64) {
    let dir = agents_dir.join(name);
    std::fs::create_dir_all(&dir).unwrap();

    let document = format!(
        r#"{{
  "framesize": [4, 4],
  "animations": {{
    "Greeting": {{
      "frames": [
        {{ "duration": 10, "images": [[0, 0]] }},
        {{ "duration": 10, "images": [[4, 0]] }},
        {{ "duration": 10, "images": [[0, 0]], "exitBranch": 3 }},
        {{ "duration": 10 }}
      ]
    }},
    "Idle": {{
      "frames": [ {{ "durationMs": {idle_ms}, "imageRef": [0, 0] }} ]
    }}
  }},
  "sounds": ["ignored.wav"]
}}"#
    );
    std::fs::write(dir.join("agent.json"), document).unwrap();

    let mut atlas = RgbaImage::new(8, 4);
    for (x, _, pixel) in atlas.enumerate_pixels_mut() {
        *pixel = if x < 4 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 255])
        };
    }
    atlas.save(dir.join("map.png")).unwrap();
}
