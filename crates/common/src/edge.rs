#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    NoChange,
}

/// Two-sample transition detector for a remote boolean flag.
#[derive(Debug, Clone, Copy)]
pub struct EdgeDetector {
    previous: bool,
    current: bool,
}

impl EdgeDetector {
    pub fn new(initial: bool) -> Self {
        Self {
            previous: initial,
            current: initial,
        }
    }

    pub fn observe(&mut self, value: bool) -> Edge {
        self.previous = self.current;
        self.current = value;
        match (self.previous, self.current) {
            (false, true) => Edge::Rising,
            (true, false) => Edge::Falling,
            _ => Edge::NoChange,
        }
    }

    pub fn previous(&self) -> bool {
        self.previous
    }

    pub fn current(&self) -> bool {
        self.current
    }
}
