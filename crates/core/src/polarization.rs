//! Polarization markers (TE/TM) for planar cells.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Polarization {
    /// Magnetic field along z, electric field in-plane.
    TE,
    /// Electric field along z.
    #[default]
    TM,
}
