//! Earth Engine expression graphs.
//!
//! `value:compute` takes a graph of named values; every node is either a
//! constant or a function invocation whose arguments are nodes. The source
//! image is stored once and referenced by name from every band selection.
//! Composites evaluate their bands on each scene before the median.

use serde_json::{json, Map, Value};

use crate::analysis::band::{BandExpr, BandImage};
use crate::collect::catalog::{ClassificationImage, ImageSource, ReduceRequest, Reducer, PAIR_AFTER, PAIR_BEFORE};
use crate::geo_core::AreaOfInterest;

const SOURCE_REF: &str = "source";
const RESULT_REF: &str = "0";

pub fn invoke(function: &str, arguments: Value) -> Value {
    json!({ "functionInvocationValue": { "functionName": function, "arguments": arguments } })
}

pub fn constant(value: impl Into<Value>) -> Value {
    json!({ "constantValue": value.into() })
}

fn reference(name: &str) -> Value {
    json!({ "valueReference": name })
}

fn array(values: Vec<Value>) -> Value {
    json!({ "arrayValue": { "values": values } })
}

fn load(id: &str) -> Value {
    invoke("Image.load", json!({ "id": constant(id) }))
}

fn select_rename(image: Value, band: &str, name: &str) -> Value {
    let selected = invoke(
        "Image.select",
        json!({ "input": image, "bandSelectors": constant(vec![band]) }),
    );
    invoke("Image.rename", json!({ "input": selected, "names": constant(vec![name]) }))
}

fn classification(image: &ClassificationImage, name: &str) -> Value {
    select_rename(load(&image.id), &image.band, name)
}

/// Geometry node for an area of interest
pub fn geometry(aoi: &AreaOfInterest) -> Value {
    let coordinates: Vec<Vec<Vec<[f64; 2]>>> = aoi
        .geometry()
        .0
        .iter()
        .map(|polygon| {
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
                .collect()
        })
        .collect();
    invoke(
        "GeometryConstructors.MultiPolygon",
        json!({ "coordinates": constant(json!(coordinates)), "evenOdd": constant(true) }),
    )
}

/// Image node the bands are computed from
pub fn source(source: &ImageSource, aoi: &AreaOfInterest) -> Value {
    let image = match source {
        ImageSource::MedianComposite { collection, bands } => {
            let images = collection
                .scenes()
                .iter()
                .map(|s| stack(bands, &load(&s.id)))
                .collect();
            let collection = invoke("ImageCollection.fromImages", json!({ "images": array(images) }));
            invoke("reduce.median", json!({ "collection": collection }))
        }
        ImageSource::ClassificationPair { before, after } => invoke(
            "Image.addBands",
            json!({
                "dstImg": classification(before, PAIR_BEFORE),
                "srcImg": classification(after, PAIR_AFTER),
            }),
        ),
    };
    invoke("Image.clip", json!({ "input": image, "geometry": geometry(aoi) }))
}

fn binary(function: &str, a: &BandExpr, b: &BandExpr, input: &Value) -> Value {
    invoke(
        function,
        json!({ "image1": expression_on(a, input), "image2": expression_on(b, input) }),
    )
}

/// Encode a band expression against the shared source image
pub fn expression(expr: &BandExpr) -> Value {
    expression_on(expr, &reference(SOURCE_REF))
}

/// Encode a band expression whose band selections read from `input`
pub fn expression_on(expr: &BandExpr, input: &Value) -> Value {
    match expr {
        BandExpr::Band(name) => invoke(
            "Image.select",
            json!({ "input": input, "bandSelectors": constant(vec![name.as_str()]) }),
        ),
        BandExpr::Constant(v) => invoke("Image.constant", json!({ "value": constant(*v) })),
        BandExpr::Add(a, b) => binary("Image.add", a, b, input),
        BandExpr::Sub(a, b) => binary("Image.subtract", a, b, input),
        BandExpr::Mul(a, b) => binary("Image.multiply", a, b, input),
        BandExpr::Div(a, b) => binary("Image.divide", a, b, input),
        BandExpr::Pow(a, exponent) => binary("Image.pow", a, &BandExpr::Constant(*exponent), input),
        BandExpr::Min(a, b) => binary("Image.min", a, b, input),
        BandExpr::Max(a, b) => binary("Image.max", a, b, input),
        BandExpr::NotEqual(a, b) => binary("Image.neq", a, b, input),
    }
}

fn named_band(band: &BandImage, input: &Value) -> Value {
    invoke(
        "Image.rename",
        json!({ "input": expression_on(&band.expr, input), "names": constant(vec![band.name.as_str()]) }),
    )
}

/// `bands` computed from `input` and stacked into one image
fn stack(bands: &[BandImage], input: &Value) -> Value {
    bands
        .iter()
        .map(|band| named_band(band, input))
        .reduce(|dst, src| invoke("Image.addBands", json!({ "dstImg": dst, "srcImg": src })))
        .unwrap_or_else(|| input.clone())
}

fn reducer(reducer: Reducer) -> Value {
    match reducer {
        Reducer::Mean => invoke("Reducer.mean", json!({})),
        Reducer::Sum => invoke("Reducer.sum", json!({})),
    }
}

/// Full `value:compute` body for a region reduction
pub fn reduce_region(request: &ReduceRequest<'_>) -> Value {
    let image = stack(request.bands, &reference(SOURCE_REF));

    let reduction = invoke(
        "Image.reduceRegion",
        json!({
            "image": image,
            "reducer": reducer(request.reducer),
            "geometry": geometry(request.aoi),
            "scale": constant(request.scale),
            "maxPixels": constant(request.max_pixels),
        }),
    );

    let mut values = Map::new();
    values.insert(SOURCE_REF.to_string(), source(request.source, request.aoi));
    values.insert(RESULT_REF.to_string(), reduction);
    json!({ "expression": { "result": RESULT_REF, "values": values } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::indices::IndexCalculator;
    use crate::collect::catalog::{ImageCollection, SceneRef, SpectralBands};
    use chrono::{TimeZone, Utc};

    fn function_names(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(name)) = map.get("functionName") {
                    out.push(name.clone());
                }
                map.values().for_each(|v| function_names(v, out));
            }
            Value::Array(items) => items.iter().for_each(|v| function_names(v, out)),
            _ => {}
        }
    }

    #[test]
    fn test_constant_and_band_nodes() {
        assert_eq!(
            expression(&BandExpr::constant(2.5)),
            json!({"functionInvocationValue": {"functionName": "Image.constant",
                "arguments": {"value": {"constantValue": 2.5}}}})
        );
        let band = expression(&BandExpr::band("B8"));
        assert_eq!(
            band["functionInvocationValue"]["arguments"]["input"],
            json!({"valueReference": "source"})
        );
    }

    #[test]
    fn test_reduce_region_graph() {
        let collection = ImageCollection::new(
            "COPERNICUS/S2_SR",
            vec![SceneRef {
                id: "COPERNICUS/S2_SR/20240101T000000_T18LTQ".into(),
                acquired: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                cloud_cover: Some(3.0),
            }],
        );
        let image = IndexCalculator::new(SpectralBands::default()).run(collection);
        let aoi = AreaOfInterest::default_fallback().unwrap();
        let request = ReduceRequest {
            source: &image.source,
            bands: &image.bands[..2],
            reducer: Reducer::Mean,
            aoi: &aoi,
            scale: 30.0,
            max_pixels: 1_000,
        };
        let body = reduce_region(&request);

        assert_eq!(body["expression"]["result"], "0");
        let result = &body["expression"]["values"]["0"]["functionInvocationValue"];
        assert_eq!(result["functionName"], "Image.reduceRegion");
        assert_eq!(result["arguments"]["maxPixels"]["constantValue"], 1_000);

        let mut names = Vec::new();
        function_names(&body, &mut names);
        for expected in ["reduce.median", "Image.addBands", "Reducer.mean", "Image.divide", "Image.clip"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_composite_computes_bands_on_each_scene() {
        let scene = |day: u32| SceneRef {
            id: format!("COPERNICUS/S2_SR/202401{:02}T000000_T18LTQ", day),
            acquired: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            cloud_cover: None,
        };
        let collection = ImageCollection::new("COPERNICUS/S2_SR", vec![scene(1), scene(6)]);
        let ndvi = BandImage::new("NDVI", BandExpr::normalized_difference("B8", "B4"));
        let aoi = AreaOfInterest::default_fallback().unwrap();
        let graph = source(
            &ImageSource::MedianComposite { collection, bands: vec![ndvi] },
            &aoi,
        );

        let clip = &graph["functionInvocationValue"];
        assert_eq!(clip["functionName"], "Image.clip");
        let median = &clip["arguments"]["input"]["functionInvocationValue"];
        assert_eq!(median["functionName"], "reduce.median");
        let images = &median["arguments"]["collection"]["functionInvocationValue"]["arguments"]["images"]["arrayValue"]["values"];
        let images = images.as_array().unwrap();
        assert_eq!(images.len(), 2);
        for image in images {
            let rename = &image["functionInvocationValue"];
            assert_eq!(rename["functionName"], "Image.rename");
            let mut names = Vec::new();
            function_names(image, &mut names);
            assert!(names.iter().any(|n| n == "Image.load"));
            assert!(!image.to_string().contains("valueReference"));
        }
    }
}
