use pf_types::ports::{Node, NodeSource};
use std::path::PathBuf;

/// Node list read from a JSON/YAML file on every generation.
///
/// A missing or unreadable file yields no nodes; groups that expand to all outbounds then
/// fall back to `DIRECT`.
#[derive(Debug, Clone)]
pub struct FileNodeSource {
    path: PathBuf,
}

impl FileNodeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> anyhow::Result<Vec<Node>> {
        let text = std::fs::read_to_string(&self.path)?;
        crate::cli::parse_doc(&self.path, &text)
    }
}

impl NodeSource for FileNodeSource {
    fn nodes(&self) -> Vec<Node> {
        match self.load() {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "nodes unavailable");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_yaml_list() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nodes.yaml");
        std::fs::write(
            &p,
            "- tag: HK 01\n  outbound: {type: shadowsocks, server: 1.2.3.4, server_port: 443}\n- tag: vps\n  manual: true\n",
        )
        .unwrap();
        let nodes = FileNodeSource::new(&p).nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].outbound["server_port"], 443);
        assert!(nodes[1].manual);
    }

    #[test]
    fn missing_file_is_empty() {
        assert!(FileNodeSource::new("/nonexistent/nodes.json").nodes().is_empty());
    }
}
