use std::fmt;

pub const NUM_LANDMARKS: usize = 21;

/// One skeletal point of a detected hand. `x`/`y` are normalized to the
/// image (0..1); `z` is relative depth, only comparable within one hand.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HandLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl HandLandmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_pixels(&self, width: f32, height: f32) -> (f32, f32) {
        (self.x * width, self.y * height)
    }
}

/// The 21-point skeleton of a single hand, wrist first.
#[derive(Clone, Debug, PartialEq)]
pub struct Hand {
    landmarks: [HandLandmark; NUM_LANDMARKS],
}

impl Hand {
    pub fn new(landmarks: [HandLandmark; NUM_LANDMARKS]) -> Self {
        Self { landmarks }
    }

    pub fn landmarks(&self) -> &[HandLandmark; NUM_LANDMARKS] {
        &self.landmarks
    }

    pub fn landmark(&self, index: usize) -> HandLandmark {
        self.landmarks[index]
    }
}

impl TryFrom<Vec<HandLandmark>> for Hand {
    type Error = usize;

    /// Fails with the actual point count when it is not 21.
    fn try_from(points: Vec<HandLandmark>) -> Result<Self, Self::Error> {
        let len = points.len();
        let landmarks: [HandLandmark; NUM_LANDMARKS] = points.try_into().map_err(|_| len)?;
        Ok(Self { landmarks })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    /// Thumb to pinky; region lists follow this order.
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    pub fn tip(&self) -> usize {
        match self {
            Finger::Thumb => 4,
            Finger::Index => 8,
            Finger::Middle => 12,
            Finger::Ring => 16,
            Finger::Pinky => 20,
        }
    }

    pub fn pip(&self) -> usize {
        match self {
            Finger::Thumb => 3,
            Finger::Index => 6,
            Finger::Middle => 10,
            Finger::Ring => 14,
            Finger::Pinky => 18,
        }
    }

    /// The thumb has no DIP joint in the 21-point model.
    pub fn dip(&self) -> Option<usize> {
        match self {
            Finger::Thumb => None,
            Finger::Index => Some(7),
            Finger::Middle => Some(11),
            Finger::Ring => Some(15),
            Finger::Pinky => Some(19),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Finger::Thumb => "thumb",
            Finger::Index => "index",
            Finger::Middle => "middle",
            Finger::Ring => "ring",
            Finger::Pinky => "pinky",
        }
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Oriented box covering one nail.
///
/// `offset_x`/`offset_y` locate the unrotated box's top-left corner relative
/// to its own center, so drawing is translate to center, rotate, draw at
/// offset. `angle_degrees` is 0 for a finger pointing to the image top and
/// grows clockwise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NailRegion {
    pub finger: Finger,
    pub offset_x: f32,
    pub offset_y: f32,
    pub width: f32,
    pub height: f32,
    pub angle_degrees: f32,
    pub center_x: f32,
    pub center_y: f32,
}

impl NailRegion {
    pub fn centered(
        finger: Finger,
        center_x: f32,
        center_y: f32,
        width: f32,
        height: f32,
        angle_degrees: f32,
    ) -> Self {
        Self {
            finger,
            offset_x: -width / 2.0,
            offset_y: -height / 2.0,
            width,
            height,
            angle_degrees,
            center_x,
            center_y,
        }
    }

    pub fn angle_radians(&self) -> f32 {
        self.angle_degrees.to_radians()
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Corners of the rotated box in image pixels, clockwise from top-left.
    pub fn corners(&self) -> [(f32, f32); 4] {
        let (sin, cos) = self.angle_radians().sin_cos();
        let local = [
            (self.offset_x, self.offset_y),
            (self.offset_x + self.width, self.offset_y),
            (self.offset_x + self.width, self.offset_y + self.height),
            (self.offset_x, self.offset_y + self.height),
        ];
        local.map(|(x, y)| {
            (
                self.center_x + x * cos - y * sin,
                self.center_y + x * sin + y * cos,
            )
        })
    }
}

/// Result of one detection request against the landmark provider.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    Detected(Vec<Hand>),
    NotFound,
    Unavailable(String),
}

impl DetectionOutcome {
    pub fn from_hands(hands: Vec<Hand>) -> Self {
        if hands.is_empty() {
            DetectionOutcome::NotFound
        } else {
            DetectionOutcome::Detected(hands)
        }
    }
}
