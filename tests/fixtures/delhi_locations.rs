//! Real Delhi locations for realistic test fixtures.
//!
//! Ward and landmark coordinates for pickup sites, plus the three major
//! municipal transfer stations used as worker depots.

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

// ============================================================================
// Transfer stations (worker depots)
// ============================================================================

pub const DEPOTS: &[Location] = &[
    Location::new("Okhla Transfer Station", 28.5122, 77.2869),
    Location::new("Bhalswa Transfer Station", 28.7357, 77.1620),
    Location::new("Ghazipur Transfer Station", 28.6233, 77.3232),
];

// ============================================================================
// Central Delhi pickup sites
// ============================================================================

pub const CENTRAL_SITES: &[Location] = &[
    Location::new("Connaught Place", 28.6315, 77.2167),
    Location::new("India Gate", 28.6129, 77.2295),
    Location::new("Chandni Chowk", 28.6506, 77.2303),
    Location::new("Karol Bagh", 28.6519, 77.1909),
    Location::new("Paharganj", 28.6444, 77.2144),
    Location::new("Daryaganj", 28.6425, 77.2433),
];

// ============================================================================
// South Delhi pickup sites
// ============================================================================

pub const SOUTH_SITES: &[Location] = &[
    Location::new("Lajpat Nagar", 28.5677, 77.2433),
    Location::new("Saket", 28.5245, 77.2066),
    Location::new("Hauz Khas", 28.5494, 77.2001),
    Location::new("Greater Kailash", 28.5494, 77.2425),
    Location::new("Nehru Place", 28.5483, 77.2513),
    Location::new("Vasant Kunj", 28.5200, 77.1590),
];

// ============================================================================
// West / North Delhi pickup sites
// ============================================================================

pub const WEST_SITES: &[Location] = &[
    Location::new("Rajouri Garden", 28.6425, 77.1225),
    Location::new("Punjabi Bagh", 28.6742, 77.1311),
    Location::new("Janakpuri", 28.6219, 77.0878),
    Location::new("Pitampura", 28.6985, 77.1318),
    Location::new("Rohini", 28.7383, 77.0822),
    Location::new("Dwarka", 28.5921, 77.0460),
];

// ============================================================================
// East Delhi pickup sites
// ============================================================================

pub const EAST_SITES: &[Location] = &[
    Location::new("Mayur Vihar", 28.6091, 77.2931),
    Location::new("Preet Vihar", 28.6412, 77.2950),
    Location::new("Shahdara", 28.6811, 77.2894),
];
