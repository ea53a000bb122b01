pub mod air_quality;
pub mod calendar;
pub mod carbon_intensity;
pub mod electricity_pricing;
pub mod smart_meter;
pub mod weather;

pub use air_quality::AirQualityFetcher;
pub use calendar::{CalendarFetcher, TokenStore};
pub use carbon_intensity::CarbonIntensityFetcher;
pub use electricity_pricing::ElectricityPricingFetcher;
pub use smart_meter::SmartMeterFetcher;
pub use weather::WeatherFetcher;
