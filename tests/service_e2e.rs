use std::sync::Arc;

use serde_json::Value;

use biosim::engine::scripted::ScriptedFactory;
use biosim::{
    BioSimConfig, BioSimService, CacheHandle, GenerationRequest, Location, ModelRequest, NormalsPeriod,
    NormalsRequest, OutputFormat, Request, Response, Source,
};

fn service(factory: ScriptedFactory) -> BioSimService {
    let mut config = BioSimConfig::default();
    config.workers.lazy_start = true;
    BioSimService::new(config, Arc::new(factory)).unwrap()
}

fn quebec() -> Location {
    Location::new(46.8, -71.2)
}

#[test]
fn generate_then_model_through_process() {
    let service = service(ScriptedFactory::new());

    let generation = GenerationRequest::new(vec![quebec(), Location::new(48.4, -68.5)], 2019, 2022).with_replicates(3);
    let Response::Handles(handles) = service.process(&Request::Generation(generation)).unwrap() else {
        panic!("expected handles");
    };
    assert_eq!(handles.len(), 2);
    assert_ne!(handles[0], handles[1]);
    assert_eq!(service.memory_load().unwrap(), 2);

    let mut model = ModelRequest::new("DegreeDay_Annual", handles);
    model.format = OutputFormat::Json;
    let response = service.process(&Request::Model(model)).unwrap();
    let json: Value = serde_json::from_str(&response.render(OutputFormat::Json)).unwrap();

    for location in ["0", "1"] {
        let reps = json[location].as_object().unwrap();
        assert_eq!(reps.len(), 3);
        let rows = reps["0"].as_array().unwrap();
        let years: Vec<i64> = rows.iter().map(|r| r["Year"].as_i64().unwrap()).collect();
        assert_eq!(years.first(), Some(&2019));
        assert_eq!(years.last(), Some(&2022));
        assert!(years.windows(2).all(|w| w[0] <= w[1]));
        assert!(rows.iter().all(|r| r["DataType"].is_string()));
    }
}

#[test]
fn unknown_handles_are_all_reported() {
    let service = service(ScriptedFactory::new());
    let handles = service
        .generate(&GenerationRequest::new(vec![quebec()], 2000, 2000))
        .unwrap();

    let mut requested = handles;
    requested.push(CacheHandle::new("deadbeef"));
    requested.push(CacheHandle::new("cafebabe"));
    let err = service
        .run_model(&ModelRequest::new("DegreeDay_Annual", requested))
        .unwrap_err();
    assert!(err.is_client_error());
    let message = err.to_string();
    assert!(message.contains("deadbeef"));
    assert!(message.contains("cafebabe"));
}

#[test]
fn coordinate_caps_are_enforced_not_truncated() {
    let service = service(ScriptedFactory::new());
    let caps = service.max_coordinates();

    let too_many = vec![quebec(); caps.generation + 1];
    let err = service
        .generate(&GenerationRequest::new(too_many, 2000, 2001))
        .unwrap_err();
    assert!(err.is_resource());
    assert_eq!(service.memory_load().unwrap(), 0);

    let at_cap = vec![quebec(); caps.normals];
    let output = service
        .normals(&NormalsRequest::new(at_cap, NormalsPeriod::P1981_2010))
        .unwrap();
    assert_eq!(output.replies.len(), caps.normals);
}

#[test]
fn invalid_requests_list_every_problem() {
    let service = service(ScriptedFactory::new());
    let mut request = GenerationRequest::new(vec![Location::new(95.0, -200.0)], 2010, 2000).with_replicates(0);
    request.nb_nearest_neighbor = Some(40);
    let err = service.generate(&request).unwrap_err();
    assert!(err.is_validation());
    let message = err.to_string();
    assert!(message.contains("Error: "), "{message}");
    for needle in ["lat", "long", "2010", "rep", "40"] {
        assert!(message.contains(needle), "{message} lacks {needle}");
    }
}

#[test]
fn failed_location_stays_in_its_slot() {
    let service = service(ScriptedFactory::new().with_failing_latitude(10.0));
    let request = GenerationRequest::new(vec![quebec(), Location::new(10.0, -71.0), quebec()], 2015, 2016);
    let series = service.generate_series(&request).unwrap();
    assert_eq!(series.succeeded(), 2);
    assert!(series.locations[1].is_err());

    let csv = series.to_csv();
    assert_eq!(csv.matches("Rep,Year").count(), 2);
    assert!(csv.contains("Error: station not found"));
}

#[test]
fn forced_generation_ignores_observations() {
    let service = service(ScriptedFactory::new());
    let request = GenerationRequest::new(vec![quebec()], 1995, 2000).with_source(Source::FromNormals);
    let resolution = service.resolve(&request).unwrap();
    assert!(resolution.is_complete());
    assert!(resolution.spans.iter().all(|s| s.epoch.daily().is_none()));

    let series = service.generate_series(&request).unwrap();
    let merged = series.locations[0].as_ref().unwrap();
    let first = &merged.replicates()[0];
    assert_eq!(first.first().unwrap().fields[0], "1995");
    assert_eq!(first.last().unwrap().fields[0], "2000");
}

#[test]
fn cleanup_and_memory_introspection() {
    let service = service(ScriptedFactory::new());
    assert_eq!(service.max_memory(), BioSimConfig::default().limits.cache_capacity);
    let handles = service
        .generate(&GenerationRequest::new(vec![quebec(), quebec()], 2001, 2001))
        .unwrap();
    assert_eq!(service.cleanup(&handles[..1]).unwrap(), 1);
    assert_eq!(service.cleanup(&handles[..1]).unwrap(), 0);
    assert_eq!(service.memory_load().unwrap(), 1);
}
