use std::time::Duration;

/// Rules of the `*` group of a robots.txt file.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    allows: Vec<String>,
    disallows: Vec<String>,
    pub crawl_delay: Option<Duration>,
}

impl RobotsRules {
    pub fn parse(txt: &str) -> Self {
        let mut active = false;
        let mut rules = RobotsRules::default();
        for line in txt.lines() {
            let l = line.split('#').next().unwrap_or("").trim();
            if l.is_empty() { continue; }
            let Some((k, v)) = l.split_once(':') else { continue };
            let val = v.trim();
            match k.trim().to_lowercase().as_str() {
                "user-agent" => active = val == "*",
                "allow" if active && !val.is_empty() => rules.allows.push(val.to_string()),
                "disallow" if active && !val.is_empty() => rules.disallows.push(val.to_string()),
                "crawl-delay" if active => {
                    if let Ok(secs) = val.parse::<f64>() {
                        rules.crawl_delay = Some(Duration::from_millis((secs * 1000.0) as u64));
                    }
                }
                _ => {}
            }
        }
        rules
    }

    /// Longest matching rule wins; Allow wins ties.
    pub fn allows(&self, path: &str) -> bool {
        let longest = |rules: &[String]| rules.iter().filter(|r| path.starts_with(r.as_str())).map(|r| r.len()).max();
        match (longest(&self.allows), longest(&self.disallows)) {
            (Some(a), Some(d)) => a >= d,
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }
}
