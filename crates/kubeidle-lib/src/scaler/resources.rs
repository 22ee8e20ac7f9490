//! Container resource aggregation over pod templates

use crate::models::ResourceTotals;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Sum cpu/memory requests and limits across the template's containers
pub fn template_totals(template: &PodTemplateSpec) -> ResourceTotals {
    let mut totals = ResourceTotals::default();

    let containers = template
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    for container in containers {
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };
        if let Some(requests) = resources.requests.as_ref() {
            totals.cpu_requests_millicores += cpu_millicores(requests);
            totals.memory_requests_bytes += memory_bytes(requests);
        }
        if let Some(limits) = resources.limits.as_ref() {
            totals.cpu_limits_millicores += cpu_millicores(limits);
            totals.memory_limits_bytes += memory_bytes(limits);
        }
    }

    totals
}

fn cpu_millicores(map: &BTreeMap<String, Quantity>) -> u64 {
    map.get("cpu")
        .and_then(|q| parse_quantity(&q.0))
        .map(|cores| (cores * 1000.0).round() as u64)
        .unwrap_or(0)
}

fn memory_bytes(map: &BTreeMap<String, Quantity>) -> u64 {
    map.get("memory")
        .and_then(|q| parse_quantity(&q.0))
        .map(|bytes| bytes.round() as u64)
        .unwrap_or(0)
}

/// Parse a Kubernetes quantity (`500m`, `1.5`, `128Mi`, `1G`, `2e3`) into base units
pub fn parse_quantity(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);

    // Decimal exponent form, e.g. 1e3 or 2E-2
    if let Some(exp) = suffix.strip_prefix(['e', 'E']) {
        if let Ok(exp) = exp.parse::<i32>() {
            return number.parse::<f64>().ok().map(|n| n * 10f64.powi(exp));
        }
    }

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };

    let number = number.parse::<f64>().ok()?;
    (number >= 0.0).then_some(number * multiplier)
}
