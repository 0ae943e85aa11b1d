use std::fmt::Write;

use super::resources::ResourceGraph;

/// Render the dependency graph as a GraphML document.
pub fn to_graphml(graph: &ResourceGraph) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    out.push_str("  <graph id=\"ResourceDependencies\" edgedefault=\"directed\">\n");

    let mut vertices: Vec<&str> = graph
        .graph()
        .vertices()
        .map(|(_, v)| v.endpoint_path.as_str())
        .collect();
    vertices.sort();
    for endpoint in vertices {
        let _ = writeln!(out, "    <node id=\"{}\"/>", escape(endpoint));
    }

    let mut edges: Vec<(&str, &str)> = graph
        .graph()
        .edges()
        .filter_map(|(_, e)| {
            let source = graph.vertex(e.source)?;
            let target = graph.vertex(e.target)?;
            Some((source.endpoint_path.as_str(), target.endpoint_path.as_str()))
        })
        .collect();
    edges.sort();
    edges.dedup();
    for (source, target) in edges {
        let _ = writeln!(
            out,
            "    <edge source=\"{}\" target=\"{}\"/>",
            escape(source),
            escape(target)
        );
    }

    out.push_str("  </graph>\n");
    out.push_str("</graphml>\n");
    out
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
