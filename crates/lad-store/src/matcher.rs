use serde::{Deserialize, Serialize};

use lad_types::{ContainerLevel, DataKind, KeyComponent, LadEntry, TelemetryKey, TimeType, Timestamp};

/// Selects children during descent and filters the records found in leaves.
///
/// The container asks [`matches_child`](Self::matches_child) for every child
/// it considers, so a matcher that constrains a level prunes whole subtrees.
pub trait ContainerMatcher: Send + Sync {
    /// Does the child indexed by `component` at `level` match?
    fn matches_child(&self, level: ContainerLevel, component: &KeyComponent) -> bool;

    /// Does this matcher restrict `level` at all?
    ///
    /// Summaries and metadata descend only through constrained levels.
    fn constrains(&self, level: ContainerLevel) -> bool;

    /// Record-level filter applied inside matched leaves.
    fn matches_entry(&self, entry: &LadEntry) -> bool;
}

/// The standard query: value lists per level, identifier wildcards, data
/// level filters and an optional time box.
///
/// An empty list at a level matches every child when `match_all_on_empty`
/// is set (the default) and nothing otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadQuery {
    pub scids: Vec<u32>,
    pub venues: Vec<String>,
    pub hosts: Vec<String>,
    pub sessions: Vec<u64>,
    pub user_data_types: Vec<u8>,
    pub identifiers: Vec<KeyComponent>,
    /// Glob patterns (`*`, `?`) matched against the identifier text.
    pub identifier_patterns: Vec<String>,
    pub vcids: Vec<u8>,
    pub dss_ids: Vec<u8>,
    pub time_type: TimeType,
    /// Inclusive lower bound.
    pub lower: Option<Timestamp>,
    /// Exclusive upper bound. Equal bounds request an exact time match.
    pub upper: Option<Timestamp>,
    pub match_all_on_empty: bool,
}

impl Default for LadQuery {
    fn default() -> Self {
        Self {
            scids: Vec::new(),
            venues: Vec::new(),
            hosts: Vec::new(),
            sessions: Vec::new(),
            user_data_types: Vec::new(),
            identifiers: Vec::new(),
            identifier_patterns: Vec::new(),
            vcids: Vec::new(),
            dss_ids: Vec::new(),
            time_type: TimeType::default(),
            lower: None,
            upper: None,
            match_all_on_empty: true,
        }
    }
}

impl LadQuery {
    /// A query matching everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// A query matching exactly the leaf that holds `key`.
    pub fn for_key(key: &TelemetryKey) -> Self {
        let mut query = Self::all()
            .scid(key.scid)
            .venue(key.venue.clone())
            .host(key.host.clone())
            .session(key.session)
            .data_type(key.user_data_type)
            .identifier(key.identifier.clone());
        if let Some(vcid) = key.vcid {
            query = query.vcid(vcid);
        }
        if let Some(dss_id) = key.dss_id {
            query = query.dss_id(dss_id);
        }
        query
    }

    pub fn scid(mut self, scid: u32) -> Self {
        self.scids.push(scid);
        self
    }

    pub fn venue(mut self, venue: impl Into<String>) -> Self {
        self.venues.push(venue.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    pub fn session(mut self, session: u64) -> Self {
        self.sessions.push(session);
        self
    }

    pub fn data_type(mut self, user_data_type: u8) -> Self {
        self.user_data_types.push(user_data_type);
        self
    }

    /// Restrict to one record kind, realtime and recorded.
    pub fn kind(self, kind: DataKind) -> Self {
        self.data_type(kind.user_data_type(false))
            .data_type(kind.user_data_type(true))
    }

    pub fn identifier(mut self, identifier: impl Into<KeyComponent>) -> Self {
        self.identifiers.push(identifier.into());
        self
    }

    pub fn identifier_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.identifier_patterns.push(pattern.into());
        self
    }

    pub fn vcid(mut self, vcid: u8) -> Self {
        self.vcids.push(vcid);
        self
    }

    pub fn dss_id(mut self, dss_id: u8) -> Self {
        self.dss_ids.push(dss_id);
        self
    }

    pub fn time_range(
        mut self,
        time_type: TimeType,
        lower: Option<Timestamp>,
        upper: Option<Timestamp>,
    ) -> Self {
        self.time_type = time_type;
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Empty lists match nothing instead of everything.
    pub fn strict(mut self) -> Self {
        self.match_all_on_empty = false;
        self
    }

    fn list_matches<T: PartialEq>(&self, values: &[T], value: &T) -> bool {
        if values.is_empty() {
            self.match_all_on_empty
        } else {
            values.contains(value)
        }
    }

    fn number_matches<T: Copy + Into<u64>>(&self, values: &[T], component: &KeyComponent) -> bool {
        if values.is_empty() {
            return self.match_all_on_empty;
        }
        match component {
            KeyComponent::Number(n) => values.iter().any(|v| (*v).into() == *n),
            KeyComponent::Text(_) => false,
        }
    }

    fn text_matches(&self, values: &[String], component: &KeyComponent) -> bool {
        if values.is_empty() {
            return self.match_all_on_empty;
        }
        match component {
            KeyComponent::Text(s) => values.iter().any(|v| v == s),
            KeyComponent::Number(_) => false,
        }
    }

    fn identifier_matches(&self, component: &KeyComponent) -> bool {
        if self.identifiers.is_empty() && self.identifier_patterns.is_empty() {
            return self.match_all_on_empty;
        }
        if self.identifiers.contains(component) {
            return true;
        }
        if self.identifier_patterns.is_empty() {
            return false;
        }
        let text = component.to_string();
        self.identifier_patterns
            .iter()
            .any(|pattern| glob_match(pattern, &text))
    }

    fn time_matches(&self, entry: &LadEntry) -> bool {
        if self.lower.is_none() && self.upper.is_none() {
            return true;
        }
        let Some(t) = entry.record.times.timestamp_for(self.time_type) else {
            return false;
        };
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) if lo == hi => t == lo,
            (lo, hi) => lo.map_or(true, |lo| t >= lo) && hi.map_or(true, |hi| t < hi),
        }
    }
}

impl ContainerMatcher for LadQuery {
    fn matches_child(&self, level: ContainerLevel, component: &KeyComponent) -> bool {
        match level {
            ContainerLevel::Master => true,
            ContainerLevel::Scid => self.number_matches(&self.scids, component),
            ContainerLevel::Venue => self.text_matches(&self.venues, component),
            ContainerLevel::Host => self.text_matches(&self.hosts, component),
            ContainerLevel::Session => self.number_matches(&self.sessions, component),
            ContainerLevel::DataType => self.number_matches(&self.user_data_types, component),
            ContainerLevel::Identifier => self.identifier_matches(component),
        }
    }

    fn constrains(&self, level: ContainerLevel) -> bool {
        match level {
            ContainerLevel::Master => false,
            ContainerLevel::Scid => !self.scids.is_empty(),
            ContainerLevel::Venue => !self.venues.is_empty(),
            ContainerLevel::Host => !self.hosts.is_empty(),
            ContainerLevel::Session => !self.sessions.is_empty(),
            ContainerLevel::DataType => !self.user_data_types.is_empty(),
            ContainerLevel::Identifier => {
                !self.identifiers.is_empty() || !self.identifier_patterns.is_empty()
            }
        }
    }

    fn matches_entry(&self, entry: &LadEntry) -> bool {
        let key = entry.key();
        let vcid_ok = match key.vcid {
            Some(vcid) => self.list_matches(&self.vcids, &vcid),
            None => self.vcids.is_empty(),
        };
        let dss_ok = match key.dss_id {
            Some(dss) => self.list_matches(&self.dss_ids, &dss),
            None => self.dss_ids.is_empty(),
        };
        vcid_ok && dss_ok && self.time_matches(entry)
    }
}

/// Shell-style wildcard match: `*` matches any run, `?` one character.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lad_types::{ChannelSample, ChannelValue, Origin, TelemetryRecord, TimeFields};

    fn entry(channel: &str, vcid: Option<u8>, ert_ms: i64) -> LadEntry {
        let mut origin = Origin::new(76, "FLIGHT", "gds-01", 3);
        if let Some(v) = vcid {
            origin = origin.with_vcid(v);
        }
        let rec = TelemetryRecord::channel(
            &origin,
            TimeFields::at_ert(Timestamp::from_millis(ert_ms)),
            ChannelSample::new(channel, ChannelValue::Unsigned(1)),
        );
        LadEntry::new(1, rec)
    }

    #[test]
    fn glob_wildcards() {
        assert!(glob_match("A-*", "A-0001"));
        assert!(glob_match("A-000?", "A-0001"));
        assert!(glob_match("*", ""));
        assert!(glob_match("*01", "A-0001"));
        assert!(glob_match("A*0*1", "A-0001"));
        assert!(!glob_match("B-*", "A-0001"));
        assert!(!glob_match("A-000?", "A-00011"));
        assert!(!glob_match("?", ""));
    }

    #[test]
    fn empty_lists_follow_match_all_flag() {
        let all = LadQuery::all();
        assert!(all.matches_child(ContainerLevel::Host, &"gds-01".into()));
        let strict = LadQuery::all().strict();
        assert!(!strict.matches_child(ContainerLevel::Host, &"gds-01".into()));
        assert!(strict.matches_child(ContainerLevel::Master, &"x".into()));
    }

    #[test]
    fn levels_match_by_value() {
        let q = LadQuery::all().scid(76).host("gds-01").session(3);
        assert!(q.matches_child(ContainerLevel::Scid, &KeyComponent::Number(76)));
        assert!(!q.matches_child(ContainerLevel::Scid, &KeyComponent::Number(77)));
        assert!(q.matches_child(ContainerLevel::Host, &"gds-01".into()));
        assert!(!q.matches_child(ContainerLevel::Host, &"gds-02".into()));
        assert!(q.matches_child(ContainerLevel::Venue, &"anything".into()));
        assert!(q.constrains(ContainerLevel::Session));
        assert!(!q.constrains(ContainerLevel::Venue));
    }

    #[test]
    fn identifiers_and_patterns_combine() {
        let q = LadQuery::all().identifier("B-0002").identifier_pattern("A-*");
        assert!(q.matches_child(ContainerLevel::Identifier, &"A-0001".into()));
        assert!(q.matches_child(ContainerLevel::Identifier, &"B-0002".into()));
        assert!(!q.matches_child(ContainerLevel::Identifier, &"B-0003".into()));
        let numeric = LadQuery::all().identifier_pattern("12*");
        assert!(numeric.matches_child(ContainerLevel::Identifier, &KeyComponent::Number(1234)));
    }

    #[test]
    fn vcid_filter_applies_to_entries() {
        let q = LadQuery::all().vcid(2);
        assert!(q.matches_entry(&entry("A-0001", Some(2), 10)));
        assert!(!q.matches_entry(&entry("A-0001", Some(3), 10)));
        assert!(!q.matches_entry(&entry("A-0001", None, 10)));
        assert!(LadQuery::all().matches_entry(&entry("A-0001", None, 10)));
    }

    #[test]
    fn time_box_is_half_open() {
        let q = LadQuery::all().time_range(
            TimeType::Ert,
            Some(Timestamp::from_millis(100)),
            Some(Timestamp::from_millis(200)),
        );
        assert!(q.matches_entry(&entry("A", None, 100)));
        assert!(q.matches_entry(&entry("A", None, 199)));
        assert!(!q.matches_entry(&entry("A", None, 200)));
        assert!(!q.matches_entry(&entry("A", None, 99)));
    }

    #[test]
    fn equal_bounds_request_exact_time() {
        let t = Some(Timestamp::from_millis(150));
        let q = LadQuery::all().time_range(TimeType::Ert, t, t);
        assert!(q.matches_entry(&entry("A", None, 150)));
        assert!(!q.matches_entry(&entry("A", None, 151)));
    }

    #[test]
    fn time_box_requires_the_time_type() {
        let q = LadQuery::all().time_range(TimeType::Scet, Some(Timestamp::from_millis(0)), None);
        assert!(!q.matches_entry(&entry("A", None, 100)));
    }

    #[test]
    fn for_key_selects_one_leaf() {
        let e = entry("A-0001", Some(2), 10);
        let q = LadQuery::for_key(e.key());
        for level in ContainerLevel::ALL.into_iter().skip(1) {
            let component = e.key().component(level).unwrap_or(KeyComponent::Number(0));
            assert!(q.matches_child(level, &component), "level {level}");
            assert!(q.constrains(level));
        }
        assert!(q.matches_entry(&e));
    }

    proptest::proptest! {
        #[test]
        fn literal_patterns_match_only_themselves(a in "[A-Z0-9-]{1,12}", b in "[A-Z0-9-]{1,12}") {
            proptest::prop_assert!(glob_match(&a, &a));
            proptest::prop_assert_eq!(glob_match(&a, &b), a == b);
        }

        #[test]
        fn star_suffix_matches_any_extension(prefix in "[A-Z]{0,6}", rest in "[A-Z0-9-]{0,8}") {
            let pattern = format!("{prefix}*");
            let text = format!("{prefix}{rest}");
            proptest::prop_assert!(glob_match(&pattern, &text));
        }
    }
}
