//! Stage dependency graph
//!
//! The graph is pure data: it validates itself at construction time and
//! answers topological readiness queries. It never executes anything.

use crate::config::PipelineConfig;
use research_core::{Error, Result, StageName};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

/// Static definition of one stage
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: StageName,
    pub depends_on: Vec<StageName>,
    /// A mandatory stage's failure aborts the whole run
    pub mandatory: bool,
    /// Maximum age for which a cached result may be reused
    pub freshness: Duration,
}

/// Which subset of the six stages a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisProfile {
    /// All six stages
    Full,
    /// Market data, technicals, report
    Quick,
    /// Market data and technicals only
    TechnicalOnly,
}

impl AnalysisProfile {
    fn stages(self) -> &'static [StageName] {
        match self {
            AnalysisProfile::Full => &StageName::ALL,
            AnalysisProfile::Quick => &[
                StageName::MarketData,
                StageName::Technicals,
                StageName::Report,
            ],
            AnalysisProfile::TechnicalOnly => &[StageName::MarketData, StageName::Technicals],
        }
    }
}

/// Validated, acyclic stage dependency graph
#[derive(Debug, Clone)]
pub struct StageGraph {
    definitions: BTreeMap<StageName, StageDefinition>,
    mandatory: StageName,
}

impl StageGraph {
    /// Construct a graph, validating acyclicity and the mandatory root
    ///
    /// Fails with `Error::Configuration` on duplicate definitions,
    /// dependencies on undefined stages, self-dependencies or cycles, and
    /// unless exactly one stage is mandatory with no dependencies.
    pub fn new(definitions: Vec<StageDefinition>) -> Result<Self> {
        let mut map: BTreeMap<StageName, StageDefinition> = BTreeMap::new();
        for def in definitions {
            if map.insert(def.name, def.clone()).is_some() {
                return Err(Error::Configuration(format!(
                    "stage {} defined twice",
                    def.name
                )));
            }
        }

        if map.is_empty() {
            return Err(Error::Configuration("no stages defined".to_string()));
        }

        for def in map.values() {
            for dep in &def.depends_on {
                if !map.contains_key(dep) {
                    return Err(Error::Configuration(format!(
                        "stage {} depends on undefined stage {dep}",
                        def.name
                    )));
                }
            }
        }

        let mandatory_roots: Vec<StageName> = map
            .values()
            .filter(|d| d.mandatory)
            .map(|d| d.name)
            .collect();
        let mandatory = match mandatory_roots.as_slice() {
            [single] => *single,
            [] => {
                return Err(Error::Configuration(
                    "exactly one mandatory root stage is required, found none".to_string(),
                ));
            }
            many => {
                return Err(Error::Configuration(format!(
                    "exactly one mandatory root stage is required, found {}",
                    many.len()
                )));
            }
        };
        if map
            .get(&mandatory)
            .is_some_and(|def| !def.depends_on.is_empty())
        {
            return Err(Error::Configuration(format!(
                "mandatory stage {mandatory} must not have dependencies"
            )));
        }

        Self::check_acyclic(&map)?;

        Ok(Self {
            definitions: map,
            mandatory,
        })
    }

    /// Kahn's algorithm; anything left unprocessed sits on a cycle.
    fn check_acyclic(map: &BTreeMap<StageName, StageDefinition>) -> Result<()> {
        // Duplicate entries in a dependency list must not inflate the count.
        let mut in_degree: BTreeMap<StageName, usize> = map
            .values()
            .map(|d| (d.name, d.depends_on.iter().collect::<HashSet<_>>().len()))
            .collect();
        let mut queue: VecDeque<StageName> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut processed = 0;
        while let Some(ready) = queue.pop_front() {
            processed += 1;
            for def in map.values() {
                if def.depends_on.contains(&ready) {
                    if let Some(degree) = in_degree.get_mut(&def.name) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(def.name);
                        }
                    }
                }
            }
        }

        if processed != map.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .filter(|&(_, &degree)| degree > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(Error::Configuration(format!(
                "dependency cycle involving: {}",
                stuck.join(", ")
            )));
        }
        Ok(())
    }

    /// The standard six-stage research graph
    ///
    /// Market data is the mandatory root; fundamentals and technicals build
    /// on it; strategy synthesizes fundamentals, technicals, and news; the
    /// report consumes everything.
    pub fn research(config: &PipelineConfig) -> Result<Self> {
        let def = |name: StageName, depends_on: Vec<StageName>, mandatory: bool| StageDefinition {
            name,
            depends_on,
            mandatory,
            freshness: config.freshness(name),
        };

        Self::new(vec![
            def(StageName::MarketData, vec![], true),
            def(StageName::News, vec![], false),
            def(
                StageName::Fundamentals,
                vec![StageName::MarketData],
                false,
            ),
            def(StageName::Technicals, vec![StageName::MarketData], false),
            def(
                StageName::Strategy,
                vec![
                    StageName::Fundamentals,
                    StageName::Technicals,
                    StageName::News,
                ],
                false,
            ),
            def(
                StageName::Report,
                vec![
                    StageName::MarketData,
                    StageName::News,
                    StageName::Fundamentals,
                    StageName::Technicals,
                    StageName::Strategy,
                ],
                false,
            ),
        ])
    }

    /// Restrict the graph to a profile's stage subset
    ///
    /// Dependencies on dropped stages are dropped with them; the mandatory
    /// root is part of every profile.
    pub fn restricted(&self, profile: AnalysisProfile) -> Result<Self> {
        let keep: HashSet<StageName> = profile.stages().iter().copied().collect();
        let definitions = self
            .definitions
            .values()
            .filter(|d| keep.contains(&d.name))
            .map(|d| StageDefinition {
                name: d.name,
                depends_on: d
                    .depends_on
                    .iter()
                    .copied()
                    .filter(|dep| keep.contains(dep))
                    .collect(),
                mandatory: d.mandatory,
                freshness: d.freshness,
            })
            .collect();
        Self::new(definitions)
    }

    /// Not-yet-started stages whose dependencies are all settled
    pub fn ready_set(
        &self,
        settled: &HashSet<StageName>,
        in_flight: &HashSet<StageName>,
    ) -> Vec<StageName> {
        self.definitions
            .values()
            .filter(|d| !settled.contains(&d.name) && !in_flight.contains(&d.name))
            .filter(|d| d.depends_on.iter().all(|dep| settled.contains(dep)))
            .map(|d| d.name)
            .collect()
    }

    pub fn definition(&self, name: StageName) -> Option<&StageDefinition> {
        self.definitions.get(&name)
    }

    pub fn contains(&self, name: StageName) -> bool {
        self.definitions.contains_key(&name)
    }

    pub fn mandatory_stage(&self) -> StageName {
        self.mandatory
    }

    pub fn is_mandatory(&self, name: StageName) -> bool {
        self.mandatory == name
    }

    /// Every stage in the graph, in declaration order
    pub fn stages(&self) -> impl Iterator<Item = StageName> + '_ {
        self.definitions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> StageGraph {
        StageGraph::research(&PipelineConfig::default()).unwrap()
    }

    fn plain(name: StageName, depends_on: Vec<StageName>, mandatory: bool) -> StageDefinition {
        StageDefinition {
            name,
            depends_on,
            mandatory,
            freshness: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_research_graph_shape() {
        let graph = graph();
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.mandatory_stage(), StageName::MarketData);
        assert!(graph.is_mandatory(StageName::MarketData));
        assert!(!graph.is_mandatory(StageName::Report));
    }

    #[test]
    fn test_initial_ready_set_is_roots() {
        let graph = graph();
        let ready = graph.ready_set(&HashSet::new(), &HashSet::new());
        assert_eq!(ready, vec![StageName::MarketData, StageName::News]);
    }

    #[test]
    fn test_ready_set_only_returns_satisfied_stages() {
        let graph = graph();
        let settled: HashSet<StageName> = [StageName::MarketData].into_iter().collect();
        let ready = graph.ready_set(&settled, &HashSet::new());
        // News has no deps; fundamentals and technicals unlocked; strategy
        // still waits on news.
        assert_eq!(
            ready,
            vec![
                StageName::News,
                StageName::Fundamentals,
                StageName::Technicals
            ]
        );
        for name in &ready {
            let def = graph.definition(*name).unwrap();
            assert!(def.depends_on.iter().all(|d| settled.contains(d)));
        }
    }

    #[test]
    fn test_ready_set_excludes_in_flight() {
        let graph = graph();
        let in_flight: HashSet<StageName> = [StageName::MarketData].into_iter().collect();
        let ready = graph.ready_set(&HashSet::new(), &in_flight);
        assert_eq!(ready, vec![StageName::News]);
    }

    #[test]
    fn test_every_acyclic_graph_drains() {
        let graph = graph();
        let mut settled = HashSet::new();
        while settled.len() < graph.len() {
            let ready = graph.ready_set(&settled, &HashSet::new());
            assert!(!ready.is_empty(), "graph stalled with {settled:?}");
            settled.extend(ready);
        }
    }

    #[test]
    fn test_cycle_detected() {
        let result = StageGraph::new(vec![
            plain(StageName::MarketData, vec![], true),
            plain(StageName::News, vec![StageName::Strategy], false),
            plain(StageName::Strategy, vec![StageName::News], false),
        ]);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_dependency_detected() {
        let result = StageGraph::new(vec![
            plain(StageName::MarketData, vec![], true),
            plain(StageName::News, vec![StageName::News], false),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_undefined_dependency_rejected() {
        let result = StageGraph::new(vec![
            plain(StageName::MarketData, vec![], true),
            plain(StageName::Strategy, vec![StageName::News], false),
        ]);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("undefined"));
    }

    #[test]
    fn test_mandatory_root_required() {
        // None mandatory
        assert!(StageGraph::new(vec![plain(StageName::MarketData, vec![], false)]).is_err());
        // Two mandatory
        assert!(
            StageGraph::new(vec![
                plain(StageName::MarketData, vec![], true),
                plain(StageName::News, vec![], true),
            ])
            .is_err()
        );
        // Mandatory with dependencies
        assert!(
            StageGraph::new(vec![
                plain(StageName::News, vec![], false),
                plain(StageName::MarketData, vec![StageName::News], true),
            ])
            .is_err()
        );
    }

    #[test]
    fn test_profiles_restrict_and_stay_valid() {
        let full = graph();

        let quick = full.restricted(AnalysisProfile::Quick).unwrap();
        assert_eq!(quick.len(), 3);
        assert_eq!(quick.mandatory_stage(), StageName::MarketData);
        let report = quick.definition(StageName::Report).unwrap();
        assert_eq!(
            report.depends_on,
            vec![StageName::MarketData, StageName::Technicals]
        );

        let technical = full.restricted(AnalysisProfile::TechnicalOnly).unwrap();
        assert_eq!(technical.len(), 2);
        assert!(!technical.contains(StageName::Report));

        let unrestricted = full.restricted(AnalysisProfile::Full).unwrap();
        assert_eq!(unrestricted.len(), 6);
    }
}
