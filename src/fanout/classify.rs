// Push vs. pull classification by follower count.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    /// Copy into every follower's inbox at write time.
    Push,
    /// Big-V: followers read the actor's outbox at read time instead.
    Pull,
}

impl Reach {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reach::Push => "push",
            Reach::Pull => "pull",
        }
    }
}

impl fmt::Display for Reach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strictly above the threshold is big-V; at the threshold still pushes.
pub fn classify(follower_count: i64, threshold: i64) -> Reach {
    if follower_count > threshold {
        Reach::Pull
    } else {
        Reach::Push
    }
}
