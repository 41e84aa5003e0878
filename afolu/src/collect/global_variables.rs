use std::path::PathBuf;

pub const OUTPUT_PATH: &str = "./output";

pub fn get_output_path() -> PathBuf {
    PathBuf::from(OUTPUT_PATH)
}

// Earth Engine REST endpoint and datasets
pub const EE_API_URL: &str = "https://earthengine.googleapis.com/v1";
pub const SENTINEL2_COLLECTION: &str = "COPERNICUS/S2_SR";
pub const SENTINEL2_CLOUD_PROPERTY: &str = "CLOUDY_PIXEL_PERCENTAGE";
pub const SENTINEL2_RESOLUTION_M: f64 = 10.0;
pub const WORLDCOVER_V100: &str = "ESA/WorldCover/v100";
pub const WORLDCOVER_V200: &str = "ESA/WorldCover/v200";
pub const WORLDCOVER_BAND: &str = "Map";
// One WorldCover release per map year
pub const WORLDCOVER_RELEASES: [(i32, &str); 2] = [(2020, WORLDCOVER_V100), (2021, WORLDCOVER_V200)];

// Sentinel-2 band identifiers
pub const BAND_NIR: &str = "B8";
pub const BAND_RED: &str = "B4";
pub const BAND_BLUE: &str = "B2";
pub const BAND_SWIR: &str = "B12";

// Narrative service
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

// Environment variables holding credentials
pub const ENV_EE_TOKEN: &str = "EARTHENGINE_TOKEN";
pub const ENV_EE_PROJECT: &str = "EARTHENGINE_PROJECT";
pub const ENV_ANTHROPIC_KEY: &str = "ANTHROPIC_API_KEY";

// Run defaults
pub const DEFAULT_CLOUD_COVER: u8 = 10;
pub const DEFAULT_SCALE_M: f64 = 30.0;
pub const DEFAULT_MAX_PIXELS: u64 = 10_000_000_000_000;
pub const DEFAULT_LAND_COVER_SCALE_M: f64 = 10.0;
pub const DEFAULT_ANALYSIS_DAYS: i64 = 365;
pub const DEFAULT_CHANGE_YEARS: (i32, i32) = (2020, 2021);

// Fallback area of interest (Peruvian Amazon), used when none is drawn
pub const DEFAULT_AOI_LON: f64 = -75.5;
pub const DEFAULT_AOI_LAT: f64 = -8.5;
pub const DEFAULT_AOI_RADIUS_M: f64 = 10_000.0;

// Financial projection
pub const DEFAULT_REFERENCE_PRICE: f64 = 15.0;
pub const DEFAULT_PROJECTION_AREA_HA: f64 = 100.0;
pub const DEFAULT_PROJECTION_YEARS: u32 = 10;
