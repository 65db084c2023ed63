use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::error::WeatherError;
use crate::history::ObservationFields;

const NOT_AVAILABLE: &str = "N/A";
const USER_AGENT: &str = concat!("wxtools/", env!("CARGO_PKG_VERSION"));
pub const MAX_FORECAST_DAYS: usize = 3;

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://wttr.in".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

// Subset of the wttr.in `format=j1` document.
#[derive(Debug, Default, Deserialize)]
struct Report {
    #[serde(default)]
    current_condition: Vec<CurrentCondition>,
    #[serde(default)]
    weather: Vec<ReportDay>,
}

#[derive(Debug, Default, Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: Option<String>,
    #[serde(rename = "temp_F")]
    temp_f: Option<String>,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<TextValue>,
    humidity: Option<String>,
    #[serde(rename = "windspeedKmph")]
    windspeed_kmph: Option<String>,
    #[serde(rename = "winddir16Point")]
    winddir_16_point: Option<String>,
    #[serde(rename = "FeelsLikeC")]
    feels_like_c: Option<String>,
    #[serde(rename = "FeelsLikeF")]
    feels_like_f: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ReportDay {
    date: Option<String>,
    #[serde(rename = "maxtempC")]
    max_temp_c: Option<String>,
    #[serde(rename = "mintempC")]
    min_temp_c: Option<String>,
    #[serde(default)]
    hourly: Vec<HourlySlot>,
}

#[derive(Debug, Deserialize)]
struct HourlySlot {
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<TextValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub location: String,
    pub temperature_c: String,
    pub temperature_f: String,
    pub condition: String,
    pub humidity: String,
    pub wind_speed_kmh: String,
    pub wind_direction: String,
    pub feels_like_c: String,
    pub feels_like_f: String,
}

impl CurrentWeather {
    fn from_report(location: &str, report: Report) -> Self {
        let current = report.current_condition.into_iter().next().unwrap_or_default();
        Self {
            location: location.to_string(),
            temperature_c: or_na(current.temp_c),
            temperature_f: or_na(current.temp_f),
            condition: first_description(current.weather_desc),
            humidity: or_na(current.humidity),
            wind_speed_kmh: or_na(current.windspeed_kmph),
            wind_direction: or_na(current.winddir_16_point),
            feels_like_c: or_na(current.feels_like_c),
            feels_like_f: or_na(current.feels_like_f),
        }
    }

    /// Flattens the observation into the string map kept by the history store.
    pub fn to_fields(&self) -> ObservationFields {
        [
            ("location", &self.location),
            ("temperature_c", &self.temperature_c),
            ("temperature_f", &self.temperature_f),
            ("condition", &self.condition),
            ("humidity", &self.humidity),
            ("wind_speed_kmh", &self.wind_speed_kmh),
            ("wind_direction", &self.wind_direction),
            ("feels_like_c", &self.feels_like_c),
            ("feels_like_f", &self.feels_like_f),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub max_temp_c: String,
    pub min_temp_c: String,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub location: String,
    pub days: Vec<ForecastDay>,
}

impl Forecast {
    fn from_report(location: &str, report: Report, days: usize) -> Self {
        let days = report
            .weather
            .into_iter()
            .take(days)
            .map(|day| {
                // wttr.in reports eight 3-hourly slots; the middle one is midday.
                let midday = day.hourly.len() / 2;
                let condition = day
                    .hourly
                    .into_iter()
                    .nth(midday)
                    .map(|slot| first_description(slot.weather_desc))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string());
                ForecastDay {
                    date: or_na(day.date),
                    max_temp_c: or_na(day.max_temp_c),
                    min_temp_c: or_na(day.min_temp_c),
                    condition,
                }
            })
            .collect();

        Self {
            location: location.to_string(),
            days,
        }
    }
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn first_description(values: Vec<TextValue>) -> String {
    values
        .into_iter()
        .next()
        .map(|v| v.value.trim().to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: Client,
    base_url: Url,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig) -> Result<Self, WeatherError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| WeatherError::InvalidBaseUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(WeatherError::InvalidBaseUrl(config.base_url));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { http, base_url })
    }

    fn report_url(&self, location: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(location);
        }
        url.query_pairs_mut().append_pair("format", "j1");
        url
    }

    async fn fetch_report(&self, location: &str) -> Result<Report, WeatherError> {
        let url = self.report_url(location);
        tracing::debug!(%url, "fetching weather report");

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WeatherError::Status { status, body });
        }

        response.json().await.map_err(WeatherError::Decode)
    }

    pub async fn current(&self, location: &str) -> Result<CurrentWeather, WeatherError> {
        let report = self.fetch_report(location).await?;
        Ok(CurrentWeather::from_report(location, report))
    }

    /// Forecast for up to `days` days, clamped to what the source provides.
    pub async fn forecast(&self, location: &str, days: usize) -> Result<Forecast, WeatherError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let report = self.fetch_report(location).await?;
        Ok(Forecast::from_report(location, report, days))
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_REPORT: &str = r#"{
  "current_condition": [
    {
      "FeelsLikeC": "2",
      "FeelsLikeF": "36",
      "humidity": "87",
      "temp_C": "5",
      "temp_F": "41",
      "weatherDesc": [ { "value": "Light rain " } ],
      "winddir16Point": "WSW",
      "windspeedKmph": "17"
    }
  ],
  "weather": [
    {
      "date": "2026-10-18",
      "maxtempC": "8",
      "mintempC": "3",
      "hourly": [
        { "weatherDesc": [ { "value": "Clear" } ] },
        { "weatherDesc": [ { "value": "Cloudy" } ] },
        { "weatherDesc": [ { "value": "Overcast" } ] },
        { "weatherDesc": [ { "value": "Patchy rain nearby" } ] }
      ]
    },
    {
      "date": "2026-10-19",
      "maxtempC": "10",
      "mintempC": "4",
      "hourly": []
    },
    {
      "date": "2026-10-20",
      "maxtempC": "12",
      "mintempC": "6",
      "hourly": [ { "weatherDesc": [ { "value": "Sunny" } ] } ]
    }
  ]
}"#;
