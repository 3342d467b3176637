//! Builders for real `.gem` archives used across unit tests.

use std::io::Write;

use flate2::{write::GzEncoder, Compression};

pub struct GemBuilder {
    name: String,
    version: String,
    platform: String,
    deps: Vec<(String, &'static str, Vec<(String, String)>)>,
    required_ruby: Option<(String, String)>,
    email: Option<String>,
}

impl GemBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            platform: "ruby".to_string(),
            deps: Vec::new(),
            required_ruby: None,
            email: Some("dev@example.com".to_string()),
        }
    }

    pub fn platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    pub fn runtime_dep(self, name: &str, reqs: &[(&str, &str)]) -> Self {
        self.dep(name, ":runtime", reqs)
    }

    pub fn dev_dep(self, name: &str, reqs: &[(&str, &str)]) -> Self {
        self.dep(name, ":development", reqs)
    }

    fn dep(mut self, name: &str, kind: &'static str, reqs: &[(&str, &str)]) -> Self {
        self.deps.push((
            name.to_string(),
            kind,
            reqs.iter()
                .map(|(op, v)| (op.to_string(), v.to_string()))
                .collect(),
        ));
        self
    }

    pub fn required_ruby(mut self, op: &str, version: &str) -> Self {
        self.required_ruby = Some((op.to_string(), version.to_string()));
        self
    }

    pub fn yaml(&self) -> String {
        let mut y = String::from("--- !ruby/object:Gem::Specification\n");
        y.push_str(&format!("name: {}\n", self.name));
        y.push_str(&format!(
            "version: !ruby/object:Gem::Version\n  version: '{}'\n",
            self.version
        ));
        y.push_str(&format!("platform: {}\n", self.platform));
        y.push_str("authors:\n- Test Author\n");
        if let Some(email) = &self.email {
            y.push_str(&format!("email: {email}\n"));
        }
        y.push_str("dependencies:\n");
        if self.deps.is_empty() {
            y.truncate(y.len() - "dependencies:\n".len());
            y.push_str("dependencies: []\n");
        }
        for (name, kind, reqs) in &self.deps {
            y.push_str(&format!("- !ruby/object:Gem::Dependency\n  name: {name}\n"));
            y.push_str("  requirement: !ruby/object:Gem::Requirement\n    requirements:\n");
            for (op, v) in reqs {
                y.push_str(&format!(
                    "    - - \"{op}\"\n      - !ruby/object:Gem::Version\n        version: '{v}'\n"
                ));
            }
            y.push_str(&format!("  type: {kind}\n  prerelease: false\n"));
        }
        let (op, v) = self
            .required_ruby
            .clone()
            .unwrap_or_else(|| (">=".to_string(), "0".to_string()));
        y.push_str(&format!(
            "required_ruby_version: !ruby/object:Gem::Requirement\n  requirements:\n  - - \"{op}\"\n    - !ruby/object:Gem::Version\n      version: '{v}'\n"
        ));
        y.push_str("licenses:\n- MIT\nrequire_paths:\n- lib\n");
        y.push_str("rubygems_version: 3.4.10\nspecification_version: 4\n");
        y.push_str(&format!("summary: The {} gem\n", self.name));
        y
    }

    pub fn build(&self) -> Vec<u8> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(self.yaml().as_bytes()).unwrap();
        let metadata = gz.finish().unwrap();

        let data = GzEncoder::new(Vec::new(), Compression::default())
            .finish()
            .unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in [("metadata.gz", &metadata), ("data.tar.gz", &data)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o444);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_slice())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }
}
