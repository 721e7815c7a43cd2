//! EPA PM2.5 AQI derivation for the latest-state query.

use serde::Serialize;

// (c_low, c_high, i_low, i_high)
const PM25_BREAKPOINTS: [(f64, f64, f64, f64); 6] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 150.4, 151.0, 200.0),
    (150.5, 250.4, 201.0, 300.0),
    (250.5, 500.4, 301.0, 500.0),
];

// ---

#[derive(Debug, Clone, Serialize)]
pub struct AirQuality {
    pub aqi: u32,
    pub category: &'static str,
    pub color: &'static str,
    pub description: &'static str,
    pub dominant_pollutant: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRecommendations {
    pub general: &'static str,
    pub good_outdoor_activity: bool,
    pub mask_recommended: bool,
}

// ---

/// Compute AQI from a PM2.5 concentration using the EPA piecewise formula.
pub fn from_pm25(concentration: f64) -> AirQuality {
    // ---
    let mut aqi = 0u32;
    for (c_low, c_high, i_low, i_high) in PM25_BREAKPOINTS {
        if (c_low..=c_high).contains(&concentration) {
            aqi = (((i_high - i_low) / (c_high - c_low)) * (concentration - c_low) + i_low)
                .round() as u32;
            break;
        }
    }

    let (category, color, description) = category(aqi);
    AirQuality {
        aqi,
        category,
        color,
        description,
        dominant_pollutant: "PM2.5",
    }
}

fn category(aqi: u32) -> (&'static str, &'static str, &'static str) {
    // ---
    match aqi {
        0..=50 => (
            "Good",
            "#00e400",
            "Air quality is satisfactory, and air pollution poses little or no risk.",
        ),
        51..=100 => (
            "Moderate",
            "#ffff00",
            "Air quality is acceptable. However, there may be a risk for some people.",
        ),
        101..=150 => (
            "Unhealthy for Sensitive Groups",
            "#ff7e00",
            "Members of sensitive groups may experience health effects.",
        ),
        151..=200 => (
            "Unhealthy",
            "#ff0000",
            "Some members of the general public may experience health effects.",
        ),
        201..=300 => (
            "Very Unhealthy",
            "#99004c",
            "Health alert: The risk of health effects is increased for everyone.",
        ),
        _ => (
            "Hazardous",
            "#7e0023",
            "Health warning of emergency conditions: everyone is more likely to be affected.",
        ),
    }
}

/// Coarse health guidance keyed off the AQI band.
pub fn health_recommendations(aqi: u32) -> HealthRecommendations {
    // ---
    match aqi {
        0..=50 => HealthRecommendations {
            general: "Enjoy outdoor activities! Air quality is good.",
            good_outdoor_activity: true,
            mask_recommended: false,
        },
        51..=100 => HealthRecommendations {
            general: "Air quality is acceptable, but moderate pollution may pose a risk for sensitive individuals.",
            good_outdoor_activity: true,
            mask_recommended: false,
        },
        101..=150 => HealthRecommendations {
            general: "Air quality is unhealthy for sensitive groups.",
            good_outdoor_activity: false,
            mask_recommended: true,
        },
        151..=200 => HealthRecommendations {
            general: "Everyone may begin to experience health effects.",
            good_outdoor_activity: false,
            mask_recommended: true,
        },
        201..=300 => HealthRecommendations {
            general: "Health alert! Everyone may experience more serious health effects.",
            good_outdoor_activity: false,
            mask_recommended: true,
        },
        _ => HealthRecommendations {
            general: "Health warning! Emergency conditions.",
            good_outdoor_activity: false,
            mask_recommended: true,
        },
    }
}
