//! Model table and model descriptors.

use serde::Serialize;

use crate::engine::EngineMetadata;
use crate::epoch::DataLayout;

/// A model known to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ModelSpec {
    /// Request name.
    pub name: &'static str,
    /// Model file under `models/`.
    pub file: &'static str,
    /// Nominal process count; see
    /// [`WorkerSettings::model_workers`](crate::config::WorkerSettings::model_workers).
    pub nominal_processes: usize,
}

macro_rules! models {
    ($($name:literal => $file:literal, $procs:literal;)*) => {
        &[$(ModelSpec { name: $name, file: $file, nominal_processes: $procs }),*]
    };
}

/// Every model served.
pub static MODELS: &[ModelSpec] = models! {
    "ASCE_ETc_Daily" => "ASCE-ETc (Daily).mdl", 5;
    "ASCE_ETcEx_Daily" => "ASCE-ETcEx (Daily).mdl", 5;
    "ASCE_ETsz_Daily" => "ASCE-ETsz (Daily).mdl", 5;
    "BlueStainIndex" => "BlueStainIndex.mdl", 3;
    "BlueStainVariables" => "BlueStainVariables.mdl", 7;
    "BudBurst" => "BudBurst.mdl", 4;
    "CCBio_Annual" => "CCBio (Annual).mdl", 5;
    "CCBio_Monthly" => "CCBio (Monthly).mdl", 5;
    "Climate_Moisture_Index_Monthly" => "Climate Moisture Index (Monthly).mdl", 3;
    "Climate_Mosture_Index_Annual" => "Climate Mosture Index (Annual).mdl", 3;
    "Climatic_Annual" => "Climatic (Annual).mdl", 5;
    "Climatic_Daily" => "Climatic (Daily).mdl", 5;
    "Climatic_Monthly" => "Climatic (Monthly).mdl", 5;
    "ClimaticEx_Daily" => "ClimaticEx (Daily).mdl", 5;
    "ClimaticQc_Annual" => "ClimaticQc (Annual).mdl", 7;
    "ClimaticWind_Annual" => "ClimaticWind (Annual).mdl", 3;
    "ClimaticWind_Monthly" => "ClimaticWind (Monthly).mdl", 3;
    "DegreeDay_Annual" => "DegreeDay (Annual).mdl", 9;
    "DegreeDay_Daily" => "DegreeDay (Daily).mdl", 9;
    "DegreeDay_Monthly" => "DegreeDay (Monthly).mdl", 9;
    "EmeraldAshBorer" => "EmeraldAshBorer.mdl", 3;
    "EmeraldAshBorerColdHardiness_Annual" => "EmeraldAshBorerColdHardiness (Annual).mdl", 1;
    "EuropeanElmScale" => "EuropeanElmScale.mdl", 2;
    "FallCankerworms" => "FallCankerworms.mdl", 3;
    "FWI_Annual" => "FWI (Annual).mdl", 8;
    "FWI_Daily" => "FWI (Daily).mdl", 8;
    "FWI_Monthly" => "FWI (Monthly).mdl", 8;
    "FWI_Drought_Code_Daily" => "FWI Drought Code (Daily).mdl", 8;
    "FWI_Drought_Code_Monthly" => "FWI Drought Code (Monthly).mdl", 8;
    "FWI_Drought_Code_Fixe_Daily" => "FWI Drought Code-Fixe (Daily).mdl", 8;
    "FWI_Drought_Code_Fixe_Monthly" => "FWI Drought Code-Fixe (Monthly).mdl", 8;
    "FWI_Fixed_Annual" => "FWI-Fixed (Annual).mdl", 8;
    "FWI_Fixed_Daily" => "FWI-Fixed (Daily).mdl", 8;
    "FWI_Fixed_Monthly" => "FWI-Fixed (Monthly).mdl", 8;
    "GrowingSeason" => "GrowingSeason.mdl", 8;
    "Gypsy_Moth_Seasonality" => "Gypsy Moth Seasonality.mdl", 9;
    "Gypsy_Moth_Stability" => "Gypsy Moth Stability.mdl", 2;
    "HemlockLooper" => "HemlockLooper.mdl", 9;
    "HemlockLooperRemi" => "HemlockLooperRemi.mdl", 1;
    "HemlockWoollyAdelgid_Annual" => "HemlockWoollyAdelgid (Annual).mdl", 5;
    "HemlockWoollyAdelgid_Daily" => "HemlockWoollyAdelgid (Daily).mdl", 5;
    "Jackpine_Budworm" => "Jackpine Budworm.mdl", 9;
    "LaricobiusNigrinus" => "LaricobiusNigrinus.mdl", 5;
    "MPB_Cold_Tolerance_Annual" => "MPB Cold Tolerance (Annual).mdl", 5;
    "MPB_Cold_Tolerance_Daily" => "MPB Cold Tolerance (Daily).mdl", 5;
    "MPB_SLR" => "MPB-SLR.mdl", 7;
    "ObliqueBandedLeafroller" => "ObliqueBandedLeafroller.mdl", 5;
    "PlantHardinessCanada" => "PlantHardinessCanada.mdl", 5;
    "PlantHardinessUSA" => "PlantHardinessUSA.mdl", 5;
    "Potential_Evapotranspiration_Annual" => "Potential Evapotranspiration (Annual).mdl", 7;
    "Potential_Evapotranspiration_Daily" => "Potential Evapotranspiration (Daily).mdl", 7;
    "Potential_Evapotranspiration_Monthly" => "Potential Evapotranspiration (Monthly).mdl", 7;
    "Potential_Evapotranspiration_Ex_Annual" => "Potential Evapotranspiration Ex (Annual).mdl", 7;
    "Potential_Evapotranspiration_Ex_Daily" => "Potential Evapotranspiration Ex (Daily).mdl", 7;
    "Potential_Evapotranspiration_Ex_Monthly" => "Potential Evapotranspiration Ex (Monthly).mdl", 7;
    "ReverseDegreeDay_Annual" => "ReverseDegreeDay (Annual).mdl", 3;
    "ReverseDegreeDay_Overall_years" => "ReverseDegreeDay (Overall years).mdl", 3;
    "SiteIndexClimate" => "SiteIndexClimate.mdl", 3;
    "SnowMelt_Monthly" => "SnowMelt (Monthly).mdl", 3;
    "Soil_Moisture_Index_Annual" => "Soil Moisture Index (Annual).mdl", 3;
    "Soil_Moisture_Index_Daily" => "Soil Moisture Index (Daily).mdl", 3;
    "Soil_Moisture_Index_Monthly" => "Soil Moisture Index (Monthly).mdl", 3;
    "Soil_Moisture_Index_QL_Annual" => "Soil Moisture Index QL(Annual).mdl", 3;
    "Soil_Moisture_Index_QL_Daily" => "Soil Moisture Index QL(Daily).mdl", 3;
    "Soil_Moisture_Index_QL_Monthly" => "Soil Moisture Index QL(Monthly).mdl", 3;
    "SpringCankerworms" => "SpringCankerworms.mdl", 3;
    "Spruce_Budworm_Biology_Annual" => "Spruce Budworm Biology (Annual).mdl", 9;
    "Spruce_Budworm_Biology" => "Spruce Budworm Biology.mdl", 9;
    "Spruce_Budworm_Manitoba" => "Spruce Budworm Manitoba.mdl", 3;
    "SpruceBeetle" => "SpruceBeetle.mdl", 3;
    "Standardised_Precipitation_Evapotranspiration_Index" => "Standardised Precipitation Evapotranspiration Index.mdl", 7;
    "TminTairTmax_Daily" => "TminTairTmax (Daily).mdl", 5;
    "Tranosema_OBL_SBW_daily" => "Tranosema-OBL-SBW (daily).mdl", 5;
    "VaporPressureDeficit_Annual" => "VaporPressureDeficit (Annual).mdl", 5;
    "VaporPressureDeficit_Daily" => "VaporPressureDeficit (Daily).mdl", 5;
    "VaporPressureDeficit_Monthly" => "VaporPressureDeficit (Monthly).mdl", 5;
    "Western_Spruce_Budworm_annual" => "Western Spruce Budworm (annual).mdl", 5;
    "Western_Spruce_Budworm" => "Western Spruce Budworm.mdl", 9;
    "WhitemarkedTussockMoth" => "WhitemarkedTussockMoth.mdl", 5;
    "WhitePineWeevil" => "WhitePineWeevil.mdl", 5;
    "Yellowheaded_Spruce_Sawfly" => "Yellowheaded Spruce Sawfly.mdl", 9;
};

impl ModelSpec {
    /// Looks a model up by request name.
    #[must_use]
    pub fn find(name: &str) -> Option<&'static Self> {
        MODELS.iter().find(|m| m.name == name)
    }

    /// Engine initialization command.
    #[must_use]
    pub fn init_command(&self, layout: &DataLayout) -> String {
        format!("Model={}", DataLayout::join_display(&layout.models().join(self.file)))
    }
}

/// What a loaded model reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    /// Request name.
    pub name: String,
    /// Help text.
    pub help: String,
    /// Default parameters, one `Key=Value` per entry.
    pub default_parameters: Vec<String>,
    /// Weather variables the model needs.
    pub required_variables: Vec<String>,
}

impl ModelDescriptor {
    /// Builds the descriptor from engine metadata.
    #[must_use]
    pub fn from_metadata(name: &str, metadata: &EngineMetadata) -> Self {
        Self {
            name: name.to_string(),
            help: metadata.help.clone(),
            default_parameters: metadata
                .default_parameters
                .split('+')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            required_variables: metadata.required_variables.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn names_are_unique() {
        let names: HashSet<&str> = MODELS.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), MODELS.len());
    }

    #[test]
    fn find_and_init_command() {
        let spec = ModelSpec::find("Spruce_Budworm_Biology").unwrap();
        assert_eq!(spec.nominal_processes, 9);
        let cmd = spec.init_command(&DataLayout::new("/srv/biosim"));
        assert!(cmd.starts_with("Model="));
        assert!(cmd.ends_with("Spruce Budworm Biology.mdl"));
        assert!(ModelSpec::find("Unknown").is_none());
    }

    #[test]
    fn descriptor_splits_parameters() {
        let metadata = EngineMetadata {
            help: "help".to_string(),
            default_parameters: "Threshold=5+Base=10".to_string(),
            required_variables: vec!["TN".to_string()],
        };
        let d = ModelDescriptor::from_metadata("DegreeDay_Annual", &metadata);
        assert_eq!(d.default_parameters, vec!["Threshold=5", "Base=10"]);
    }
}
