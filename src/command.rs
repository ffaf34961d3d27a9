//! Engine command strings.
//!
//! Commands are `Key=Value` pairs joined by `&`; list values are joined by `+`.

use crate::epoch::{Epoch, Source, YearRange};
use crate::request::{GenerationRequest, Location, NORMALS_VARIABLES};

fn location_prefix(location: &Location) -> String {
    let mut command = format!("Latitude={}&Longitude={}", location.latitude, location.longitude);
    if let Some(elevation) = location.effective_elevation() {
        command.push_str(&format!("&Elevation={elevation}"));
    }
    command.push_str("&compress=0");
    command
}

fn variables<S: AsRef<str>>(variables: &[S]) -> String {
    let joined: Vec<&str> = variables.iter().map(AsRef::as_ref).collect();
    format!("&Variables={}", joined.join("+"))
}

/// Normals command for one location.
#[must_use]
pub fn normals(location: &Location) -> String {
    let mut command = location_prefix(location);
    command.push_str(&variables(&NORMALS_VARIABLES));
    command
}

/// Weather generation command for one location on one span.
///
/// Observation is downgraded to normals when the epoch has no daily
/// database; explicit years are sent only when observations are used.
#[must_use]
pub fn generation(location: &Location, request: &GenerationRequest, epoch: &Epoch, bounds: YearRange) -> String {
    let mut command = location_prefix(location);
    command.push_str(&variables(&request.variables));

    let source = epoch.effective_source(request.source);
    command.push_str(&format!("&Source={}", source.as_str()));
    if source == Source::FromObservation {
        command.push_str(&format!("&First_year={}&Last_year={}", bounds.lo, bounds.hi));
    }
    command.push_str(&format!("&Replications={}", request.replicates));
    command.push_str(&format!("&nb_years={}", bounds.len()));
    if let Some(k) = request.nb_nearest_neighbor {
        command.push_str(&format!("&nb_nearest_neighbor={k}"));
    }
    command
}

/// Model execution command; `*` separators in `parameters` become `+`.
#[must_use]
pub fn model(parameters: Option<&str>) -> String {
    let mut command = String::from("compress=0");
    if let Some(parameters) = parameters {
        command.push_str("&Parameters=");
        command.push_str(&parameters.replace('*', "+"));
    }
    command
}
