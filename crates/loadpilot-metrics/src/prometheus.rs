//! Prometheus text exposition format.
//!
//! Renders a metrics report into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use loadpilot_state::ResourceType;

use crate::report::{ComponentReport, MetricsReport};

/// Render a metrics report into Prometheus text format.
///
/// Per-component gauges carry a `component` label; utilization and
/// allocation add a `resource` label.
pub fn render_prometheus(report: &MetricsReport) -> String {
    let mut out = String::new();
    let components = &report.components;

    gauge(&mut out, "loadpilot_component_load_percent", "Running tasks as a percent of capacity.", components, |c| {
        format!("{:.2}", c.load_percent)
    });
    gauge(&mut out, "loadpilot_component_current_tasks", "Tasks currently running.", components, |c| {
        c.current_tasks.to_string()
    });
    gauge(&mut out, "loadpilot_component_success_rate", "Success rate in percent.", components, |c| {
        format!("{:.2}", c.success_rate)
    });
    gauge(&mut out, "loadpilot_component_latency_ms", "Smoothed request latency in milliseconds.", components, |c| {
        format!("{:.2}", c.avg_latency_ms)
    });
    gauge(&mut out, "loadpilot_component_throughput", "Completions per second.", components, |c| {
        format!("{:.4}", c.throughput)
    });
    gauge(&mut out, "loadpilot_component_healthy", "1 if the component accepts work.", components, |c| {
        u8::from(c.status.accepts_work()).to_string()
    });

    out.push_str("# HELP loadpilot_component_utilization_percent Resource utilization in percent.\n");
    out.push_str("# TYPE loadpilot_component_utilization_percent gauge\n");
    for c in components {
        for resource in ResourceType::ALL {
            let _ = writeln!(
                out,
                "loadpilot_component_utilization_percent{{component=\"{}\",resource=\"{}\"}} {:.2}",
                c.component,
                resource,
                c.resource_utilization.get(resource)
            );
        }
    }

    out.push_str("# HELP loadpilot_component_allocation Allocated resource units.\n");
    out.push_str("# TYPE loadpilot_component_allocation gauge\n");
    for c in components {
        for resource in ResourceType::ALL {
            let _ = writeln!(
                out,
                "loadpilot_component_allocation{{component=\"{}\",resource=\"{}\"}} {:.3}",
                c.component,
                resource,
                c.allocation.get(resource)
            );
        }
    }

    let s = &report.system;
    out.push_str("# HELP loadpilot_queue_depth Requests waiting in the queue.\n");
    out.push_str("# TYPE loadpilot_queue_depth gauge\n");
    let _ = writeln!(out, "loadpilot_queue_depth {}", s.queue_depth);

    out.push_str("# HELP loadpilot_load_distribution_score Evenness of load across components (0-100).\n");
    out.push_str("# TYPE loadpilot_load_distribution_score gauge\n");
    let _ = writeln!(out, "loadpilot_load_distribution_score {:.2}", s.load_distribution_score);

    out.push_str("# HELP loadpilot_active_algorithm Currently active load-balancing algorithm.\n");
    out.push_str("# TYPE loadpilot_active_algorithm gauge\n");
    let _ = writeln!(
        out,
        "loadpilot_active_algorithm{{algorithm=\"{}\"}} 1",
        s.active_algorithm
    );

    out.push_str("# HELP loadpilot_requests_total Requests by final outcome.\n");
    out.push_str("# TYPE loadpilot_requests_total counter\n");
    for (outcome, value) in [
        ("succeeded", s.processor.succeeded),
        ("failed", s.processor.failed),
        ("rejected", s.processor.rejected),
        ("shed", s.processor.shed),
    ] {
        let _ = writeln!(out, "loadpilot_requests_total{{outcome=\"{outcome}\"}} {value}");
    }

    out
}

fn gauge<F>(out: &mut String, name: &str, help: &str, components: &[ComponentReport], value: F)
where
    F: Fn(&ComponentReport) -> String,
{
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    for c in components {
        let _ = writeln!(out, "{name}{{component=\"{}\"}} {}", c.component, value(c));
    }
}
