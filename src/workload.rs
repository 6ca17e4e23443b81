// CKRM SYNTHETIC WORKLOAD
// CLASS DESCRIPTIONS FOR THE SIMULATOR: NAME:WEIGHT[:DEMAND_PCT[:GUARANTEE]]
//
//   web:512          HALF WEIGHT, ALWAYS RUNNABLE
//   batch:256:40     RUNNABLE 40% OF THE TIME
//   db:768:100:256   GUARANTEE OF 256 (SPENDS SAVINGS ABOVE IT)
//
// WORKLOAD FILES: ONE SPEC PER LINE, '#' STARTS A COMMENT.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::registry::ClassShares;
use crate::tuning::CKRM_MAX_WEIGHT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassSpec {
    pub name:       String,
    pub weight:     u32,
    pub demand_pct: u32,
    pub guarantee:  u32,
}

impl ClassSpec {
    pub fn new(name: &str, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            weight,
            demand_pct: 100,
            guarantee: 0,
        }
    }

    pub fn with_demand(mut self, pct: u32) -> Self {
        self.demand_pct = pct;
        self
    }

    pub fn with_guarantee(mut self, guarantee: u32) -> Self {
        self.guarantee = guarantee;
        self
    }

    pub fn shares(&self) -> ClassShares {
        ClassShares { weight: self.weight, guarantee: self.guarantee }
    }

    pub fn parse(s: &str) -> Result<Self> {
        static SPEC_RE: OnceLock<Regex> = OnceLock::new();
        let re = SPEC_RE.get_or_init(|| {
            Regex::new(r"^([A-Za-z_][A-Za-z0-9_.-]*):(\d+)(?::(\d+))?(?::(\d+))?$")
                .expect("class spec pattern is valid")
        });

        let s = s.trim();
        let caps = match re.captures(s) {
            Some(c) => c,
            None => bail!("bad class spec '{}' (want NAME:WEIGHT[:DEMAND_PCT[:GUARANTEE]])", s),
        };

        let number = |i: usize, default: u32| -> Result<u32> {
            match caps.get(i) {
                Some(m) => m.as_str().parse::<u32>()
                    .with_context(|| format!("class spec '{}': '{}' out of range", s, m.as_str())),
                None => Ok(default),
            }
        };

        let spec = Self {
            name: caps[1].to_string(),
            weight: number(2, 0)?,
            demand_pct: number(3, 100)?,
            guarantee: number(4, 0)?,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.weight == 0 || self.weight > CKRM_MAX_WEIGHT {
            bail!("class '{}': weight {} not in 1..={}", self.name, self.weight, CKRM_MAX_WEIGHT);
        }
        if self.demand_pct > 100 {
            bail!("class '{}': demand {}% above 100%", self.name, self.demand_pct);
        }
        if self.guarantee > self.weight {
            bail!("class '{}': guarantee {} above weight {}", self.name, self.guarantee, self.weight);
        }
        Ok(())
    }
}

// PARSE A WORKLOAD DOCUMENT. DUPLICATE NAMES ARE REJECTED.
pub fn parse_workload(text: &str) -> Result<Vec<ClassSpec>> {
    let mut specs: Vec<ClassSpec> = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        }.trim();
        if line.is_empty() {
            continue;
        }
        let spec = ClassSpec::parse(line)
            .with_context(|| format!("line {}", lineno + 1))?;
        if specs.iter().any(|s| s.name == spec.name) {
            bail!("line {}: duplicate class '{}'", lineno + 1, spec.name);
        }
        specs.push(spec);
    }
    Ok(specs)
}

pub fn load_workload(path: &Path) -> Result<Vec<ClassSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading workload {}", path.display()))?;
    parse_workload(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_default() {
        let s = ClassSpec::parse("web:512").unwrap();
        assert_eq!(s, ClassSpec::new("web", 512));
        assert_eq!(s.shares(), ClassShares { weight: 512, guarantee: 0 });
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let text = "# header\n\nweb:512   # trailing\n  batch:256:40\n";
        let specs = parse_workload(text).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].demand_pct, 40);
    }
}
