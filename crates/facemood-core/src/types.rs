use serde::Serialize;

/// Axis-aligned box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Clip to `[0, width) x [0, height)`.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let x1 = self.x.clamp(0.0, width as f32);
        let y1 = self.y.clamp(0.0, height as f32);
        let x2 = (self.x + self.width).clamp(0.0, width as f32);
        let y2 = (self.y + self.height).clamp(0.0, height as f32);
        BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }
}

/// One detected face with its predicted emotion.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Class names in model output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmotionLabels(Vec<String>);

impl EmotionLabels {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// Parse a comma-separated list, skipping empty entries.
    pub fn parse_list(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Name for `class_id`, or `class N` past the end of the list.
    pub fn name(&self, class_id: usize) -> String {
        self.0
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class {class_id}"))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for EmotionLabels {
    fn default() -> Self {
        Self::parse_list("angry,disgust,fear,happy,neutral,sad,surprise")
    }
}
