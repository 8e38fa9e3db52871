//! Which buffers a list of requests needs.

use std::collections::BTreeSet;

use crate::schema::{
    AnimationRequest, Component, DisplayComponent, Field, Normalization, Variable, VariableKey,
};

/// Keys needed by the residual-energy diagnostic.
pub const RESIDUAL_KEYS: [VariableKey; 7] = [
    VariableKey::new(Field::B, Component::X),
    VariableKey::new(Field::B, Component::Y),
    VariableKey::new(Field::B, Component::Z),
    VariableKey::new(Field::V, Component::X),
    VariableKey::new(Field::V, Component::Y),
    VariableKey::new(Field::V, Component::Z),
    VariableKey::new(Field::Rho, Component::Pass),
];

const XYZ: [Component; 3] = [Component::X, Component::Y, Component::Z];

/// Keys one request needs, excluding time.
pub fn required_keys(request: &AnimationRequest) -> BTreeSet<VariableKey> {
    let mut keys = BTreeSet::new();

    match request {
        AnimationRequest::Heatmap2D {
            variable,
            component,
            normalization,
        } => {
            insert_display(&mut keys, *variable, *component, false);
            if *normalization == Normalization::Unitless {
                keys.insert(VariableKey::new(*variable, Component::Magnitude));
            }
        }
        AnimationRequest::HeatmapTriple {
            variable,
            normalization,
        } => {
            keys.extend(XYZ.map(|c| VariableKey::new(*variable, c)));
            if *normalization == Normalization::Unitless {
                keys.insert(VariableKey::new(*variable, Component::Magnitude));
            }
        }
        AnimationRequest::FourierSpectrum {
            variable,
            component,
            ..
        }
        | AnimationRequest::StructureFunction {
            variable,
            component,
            ..
        }
        | AnimationRequest::Kurtosis {
            variable,
            component,
            ..
        } => insert_display(&mut keys, *variable, *component, false),
        AnimationRequest::Rms {
            variable,
            component,
            ..
        } => match variable {
            Variable::Field(field) => insert_display(&mut keys, *field, *component, true),
            Variable::Residual => keys.extend(RESIDUAL_KEYS),
        },
    }

    keys
}

/// Every distinct key needed by `requests`, plus time once when there is
/// at least one request. Iteration order is the key order.
pub fn resolve<'a>(requests: impl IntoIterator<Item = &'a AnimationRequest>) -> BTreeSet<VariableKey> {
    let mut keys = BTreeSet::new();
    let mut any = false;
    for request in requests {
        any = true;
        keys.extend(required_keys(request));
    }
    if any {
        keys.insert(VariableKey::TIME);
    }
    keys
}

fn insert_display(
    keys: &mut BTreeSet<VariableKey>,
    field: Field,
    component: DisplayComponent,
    with_parallel: bool,
) {
    match component.fetched() {
        Some(c) => {
            keys.insert(VariableKey::new(field, c));
        }
        None => {
            keys.insert(VariableKey::new(field, Component::X));
            keys.insert(VariableKey::new(field, Component::Y));
            if with_parallel {
                keys.insert(VariableKey::new(field, Component::Z));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawRequest;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn request(kind: &str, variable: &str, component: &str, params: Value) -> AnimationRequest {
        AnimationRequest::from_raw(&RawRequest::new(kind, variable, component, params)).unwrap()
    }

    fn key(field: Field, component: Component) -> VariableKey {
        VariableKey::new(field, component)
    }

    #[test]
    fn test_scalar_heatmap_keys() {
        let requests = [request("2D", "rho", "pass", json!("unit"))];
        let keys = resolve(&requests);
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![VariableKey::TIME, key(Field::Rho, Component::Pass)]
        );
    }

    #[test]
    fn test_triple_unitless_needs_magnitude() {
        let requests = [request("triple", "B", "x", json!("unitless"))];
        let keys = resolve(&requests);
        assert_eq!(keys.len(), 5);
        assert!(keys.contains(&key(Field::B, Component::Magnitude)));
        for c in XYZ {
            assert!(keys.contains(&key(Field::B, c)));
        }
    }

    #[test]
    fn test_perpendicular_keys() {
        let fourier = required_keys(&request("fourier", "B", "perp", json!(["1D"])));
        assert_eq!(fourier.len(), 2);
        let rms = required_keys(&request("rms", "B", "perp", Value::Null));
        assert_eq!(rms.len(), 3);
        assert!(rms.contains(&key(Field::B, Component::Z)));
    }

    #[test]
    fn test_residual_keys() {
        let keys = required_keys(&request("rms", "bv", "pass", json!("summary")));
        assert_eq!(keys, RESIDUAL_KEYS.into_iter().collect());
    }

    #[test]
    fn test_empty_request_list_needs_nothing() {
        assert!(resolve(&[]).is_empty());
    }

    #[test]
    fn test_shared_keys_deduplicated() {
        let requests = vec![
            request("2D", "B", "x", json!("unit")),
            request("sf", "B", "x", json!([2, 4])),
            request("kurtosis", "B", "x", json!([2, 4])),
            request("rms", "B", "x", Value::Null),
        ];
        let keys = resolve(&requests);
        assert_eq!(keys.len(), 2);
    }

    fn arb_request() -> impl Strategy<Value = AnimationRequest> {
        (
            prop::sample::select(vec!["2D", "triple", "fourier", "sf", "kurtosis", "rms"]),
            prop::sample::select(vec!["B", "v", "J", "rho", "bv"]),
            prop::sample::select(vec!["x", "y", "z", "magnitude", "perp", "pass"]),
            any::<bool>(),
        )
            .prop_filter_map("legal request", |(kind, variable, component, flag)| {
                let params = match kind {
                    "2D" | "triple" => json!(if flag { "unitless" } else { "unit" }),
                    "fourier" => {
                        if flag {
                            json!(["1D"])
                        } else {
                            json!(["y", 0.25])
                        }
                    }
                    "sf" | "kurtosis" => json!([1, 3, 9]),
                    _ => {
                        if flag {
                            json!("summary")
                        } else {
                            Value::Null
                        }
                    }
                };
                AnimationRequest::from_raw(&RawRequest::new(kind, variable, component, params))
                    .ok()
            })
    }

    proptest! {
        #[test]
        fn resolved_set_is_complete(requests in prop::collection::vec(arb_request(), 1..12)) {
            let keys = resolve(&requests);
            for request in &requests {
                prop_assert!(required_keys(request).is_subset(&keys));
            }
        }

        #[test]
        fn repeated_requests_resolve_identically(
            requests in prop::collection::vec(arb_request(), 1..6)
        ) {
            let once = resolve(&requests);
            let repeated: Vec<AnimationRequest> =
                requests.iter().cycle().take(requests.len() * 10).cloned().collect();
            prop_assert_eq!(resolve(&repeated), once);
        }

        #[test]
        fn time_present_exactly_once(requests in prop::collection::vec(arb_request(), 1..12)) {
            let keys: Vec<VariableKey> = resolve(&requests).into_iter().collect();
            prop_assert_eq!(keys.iter().filter(|k| **k == VariableKey::TIME).count(), 1);
            // No request needs time directly; it comes from the resolver.
            for request in &requests {
                prop_assert!(!required_keys(request).contains(&VariableKey::TIME));
            }
        }
    }
}
