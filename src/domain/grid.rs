// Grid layout model - per-breakpoint column configuration
use serde::{Deserialize, Serialize};
use std::fmt;

/// Viewport width tier, widest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Lg,
    Md,
    Sm,
    Xs,
    Xxs,
}

impl Breakpoint {
    pub const ALL: [Breakpoint; 5] = [
        Breakpoint::Lg,
        Breakpoint::Md,
        Breakpoint::Sm,
        Breakpoint::Xs,
        Breakpoint::Xxs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Breakpoint::Lg => "lg",
            Breakpoint::Md => "md",
            Breakpoint::Sm => "sm",
            Breakpoint::Xs => "xs",
            Breakpoint::Xxs => "xxs",
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointColumns {
    pub lg: u32,
    pub md: u32,
    pub sm: u32,
    pub xs: u32,
    pub xxs: u32,
}

impl Default for BreakpointColumns {
    fn default() -> Self {
        Self {
            lg: 12,
            md: 10,
            sm: 6,
            xs: 4,
            xxs: 2,
        }
    }
}

/// Immutable grid configuration. Column counts never increase as the breakpoint narrows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfiguration {
    columns: BreakpointColumns,
    row_height: u32,
    margin: [u32; 2],
}

impl Default for GridConfiguration {
    fn default() -> Self {
        Self {
            columns: BreakpointColumns::default(),
            row_height: 60,
            margin: [16, 16],
        }
    }
}

impl GridConfiguration {
    /// Build a configuration, returning `None` when the column counts are
    /// zero or grow toward a narrower breakpoint.
    pub fn new(columns: BreakpointColumns, row_height: u32, margin: [u32; 2]) -> Option<Self> {
        let grid = Self {
            columns,
            row_height,
            margin,
        };
        let counts: Vec<u32> = Breakpoint::ALL.iter().map(|bp| grid.columns_for(*bp)).collect();
        let monotonic = counts.windows(2).all(|pair| pair[0] >= pair[1]);
        if counts.iter().any(|c| *c == 0) || !monotonic {
            return None;
        }
        Some(grid)
    }

    pub fn columns_for(&self, breakpoint: Breakpoint) -> u32 {
        match breakpoint {
            Breakpoint::Lg => self.columns.lg,
            Breakpoint::Md => self.columns.md,
            Breakpoint::Sm => self.columns.sm,
            Breakpoint::Xs => self.columns.xs,
            Breakpoint::Xxs => self.columns.xxs,
        }
    }

    /// Column count of the widest breakpoint, where stored layouts live.
    pub fn primary_columns(&self) -> u32 {
        self.columns_for(Breakpoint::Lg)
    }

    pub fn row_height(&self) -> u32 {
        self.row_height
    }

    pub fn margin(&self) -> [u32; 2] {
        self.margin
    }
}
