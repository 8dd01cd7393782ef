//! Mention bands layered over an average.

use serde::{Deserialize, Serialize};

/// Qualitative label derived from an average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mention {
    Ajourne,
    Passable,
    AssezBien,
    Bien,
    TresBien,
}

impl Mention {
    /// Band an average expressed on `scale_max`. Thresholds are the usual
    /// 10/12/14/16 out of 20, scaled proportionally.
    pub fn from_average(average: f64, scale_max: f64) -> Self {
        let on_twenty = if scale_max > 0.0 {
            average * 20.0 / scale_max
        } else {
            0.0
        };

        if on_twenty >= 16.0 {
            Mention::TresBien
        } else if on_twenty >= 14.0 {
            Mention::Bien
        } else if on_twenty >= 12.0 {
            Mention::AssezBien
        } else if on_twenty >= 10.0 {
            Mention::Passable
        } else {
            Mention::Ajourne
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mention::TresBien => "Très Bien",
            Mention::Bien => "Bien",
            Mention::AssezBien => "Assez Bien",
            Mention::Passable => "Passable",
            Mention::Ajourne => "Ajourné",
        }
    }

    pub fn is_pass(self) -> bool {
        self >= Mention::Passable
    }
}

impl std::fmt::Display for Mention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
