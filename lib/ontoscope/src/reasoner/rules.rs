//! Built-in forward chaining over a subset of the OWL 2 RL/RDF rules.

use crate::capture::DiagnosticLog;
use crate::error::{ReasoningError, ReasoningErrorKind};
use crate::reasoner::{ReasonedOntology, Reasoner};
use crate::store::GraphStore;
use crate::task::CancellationToken;
use crate::vocab::owl;
use oxigraph::model::vocab::{rdf, rdfs};
use oxigraph::model::{NamedNode, NamedOrBlankNode, Term, TermRef, Triple};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration of the [`RuleReasoner`].
#[derive(Debug, Clone)]
pub struct RuleReasonerConfig {
    /// Maximum number of rounds for the fixpoint computation.
    pub max_iterations: usize,
    /// Maximum time allowed for reasoning (None = unlimited).
    pub timeout: Option<Duration>,
}

impl Default for RuleReasonerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1_000,
            timeout: None,
        }
    }
}

/// OWL 2 RL/RDF rule identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum RlRule {
    ScmSco,
    CaxSco,
    CaxEqc1,
    CaxEqc2,
    PrpDom,
    PrpRng,
    PrpSpo1,
    PrpEqp1,
    PrpEqp2,
    PrpSymp,
    PrpTrp,
    PrpInv1,
    PrpInv2,
    EqSym,
    EqTrans,
}

impl RlRule {
    fn name(self) -> &'static str {
        match self {
            Self::ScmSco => "scm-sco",
            Self::CaxSco => "cax-sco",
            Self::CaxEqc1 => "cax-eqc1",
            Self::CaxEqc2 => "cax-eqc2",
            Self::PrpDom => "prp-dom",
            Self::PrpRng => "prp-rng",
            Self::PrpSpo1 => "prp-spo1",
            Self::PrpEqp1 => "prp-eqp1",
            Self::PrpEqp2 => "prp-eqp2",
            Self::PrpSymp => "prp-symp",
            Self::PrpTrp => "prp-trp",
            Self::PrpInv1 => "prp-inv1",
            Self::PrpInv2 => "prp-inv2",
            Self::EqSym => "eq-sym",
            Self::EqTrans => "eq-trans",
        }
    }
}

/// Materializes the entailments of an ontology with a fixed set of OWL 2 RL rules.
///
/// Class membership goes through `rdfs:subClassOf`, `owl:equivalentClass`, `rdfs:domain` and
/// `rdfs:range`. Property assertions go through `rdfs:subPropertyOf`, `owl:equivalentProperty`,
/// `owl:inverseOf`, `owl:SymmetricProperty` and `owl:TransitiveProperty`. `owl:sameAs` is
/// closed under symmetry and transitivity.
///
/// The ontology is inconsistent if an individual belongs to `owl:Nothing` or to two classes
/// declared `owl:disjointWith` each other.
#[derive(Debug, Clone, Default)]
pub struct RuleReasoner {
    config: RuleReasonerConfig,
}

impl RuleReasoner {
    pub fn new(config: RuleReasonerConfig) -> Self {
        Self { config }
    }

    /// Returns the triples entailed by `asserted` that it does not already contain.
    pub fn materialize(
        &self,
        asserted: &[Triple],
        cancellation: &CancellationToken,
    ) -> Result<Vec<Triple>, ReasoningError> {
        let start = Instant::now();
        let mut known = FxHashSet::default();
        let mut facts = Vec::with_capacity(asserted.len());
        for triple in asserted {
            if known.insert(triple.clone()) {
                facts.push(triple.clone());
            }
        }
        let mut inferred = Vec::new();
        let mut fired = FxHashMap::<RlRule, usize>::default();
        let mut round = 0;
        let schema = loop {
            if cancellation.is_cancelled() {
                return Err(ReasoningError::cancelled());
            }
            self.check_timeout(start)?;
            if round == self.config.max_iterations {
                return Err(ReasoningError::new(
                    ReasoningErrorKind::MaxIterationsExceeded,
                    format!(
                        "No fixpoint reached after {} rounds",
                        self.config.max_iterations
                    ),
                ));
            }
            round += 1;

            let schema = Schema::new(&facts);
            let mut derivation = Derivation {
                known: &known,
                seen: FxHashSet::default(),
                new: Vec::new(),
                fired: &mut fired,
            };
            for triple in &facts {
                schema.apply(triple, &mut derivation);
            }
            let new = derivation.new;
            info!("Round {round}: {} new triples", new.len());
            if new.is_empty() {
                break schema;
            }
            for triple in new {
                known.insert(triple.clone());
                facts.push(triple.clone());
                inferred.push(triple);
            }
        };

        let mut fired = fired.into_iter().collect::<Vec<_>>();
        fired.sort_unstable();
        for (rule, count) in fired {
            debug!("{}: {count} triples", rule.name());
        }
        schema.check_consistency(&facts)?;
        info!(
            "{} triples inferred in {round} rounds ({:.2}s)",
            inferred.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(inferred)
    }

    fn check_timeout(&self, start: Instant) -> Result<(), ReasoningError> {
        if let Some(timeout) = self.config.timeout {
            if start.elapsed() >= timeout {
                return Err(ReasoningError::new(
                    ReasoningErrorKind::Timeout,
                    format!(
                        "Reasoning timeout exceeded ({:.1}s)",
                        timeout.as_secs_f64()
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl Reasoner for RuleReasoner {
    fn name(&self) -> &str {
        "built-in OWL 2 RL"
    }

    fn reason(
        &self,
        path: &Path,
        _log: &DiagnosticLog,
        cancellation: &CancellationToken,
    ) -> Result<ReasonedOntology, ReasoningError> {
        let graph = GraphStore::load(path)?;
        let asserted = graph.triples()?;
        let inferred = self.materialize(&asserted, cancellation)?;
        Ok(ReasonedOntology::new(
            path,
            graph.ontology_iri().cloned(),
            asserted,
            inferred,
        )?)
    }
}

/// The terminological part of the facts, rebuilt at each round.
#[derive(Default)]
struct Schema {
    super_classes: FxHashMap<Term, Vec<(Term, RlRule)>>,
    domains: FxHashMap<NamedNode, Vec<Term>>,
    ranges: FxHashMap<NamedNode, Vec<Term>>,
    super_properties: FxHashMap<NamedNode, Vec<(NamedNode, RlRule)>>,
    inverses: FxHashMap<NamedNode, Vec<(NamedNode, RlRule)>>,
    symmetric: FxHashMap<NamedNode, RlRule>,
    transitive: FxHashMap<NamedNode, RlRule>,
    disjoint: Vec<(Term, Term)>,
    /// (subject, transitive property) -> objects
    transitive_values: FxHashMap<(NamedOrBlankNode, NamedNode), Vec<Term>>,
}

impl Schema {
    fn new(facts: &[Triple]) -> Self {
        let mut schema = Self::default();
        schema
            .transitive
            .insert(rdfs::SUB_CLASS_OF.into_owned(), RlRule::ScmSco);
        schema
            .transitive
            .insert(owl::SAME_AS.into_owned(), RlRule::EqTrans);
        schema
            .symmetric
            .insert(owl::SAME_AS.into_owned(), RlRule::EqSym);

        for triple in facts {
            let subject = Term::from(triple.subject.clone());
            let p = triple.predicate.as_ref();
            if p == rdfs::SUB_CLASS_OF {
                schema
                    .super_classes
                    .entry(subject)
                    .or_default()
                    .push((triple.object.clone(), RlRule::CaxSco));
            } else if p == owl::EQUIVALENT_CLASS {
                schema
                    .super_classes
                    .entry(subject.clone())
                    .or_default()
                    .push((triple.object.clone(), RlRule::CaxEqc1));
                schema
                    .super_classes
                    .entry(triple.object.clone())
                    .or_default()
                    .push((subject, RlRule::CaxEqc2));
            } else if p == owl::DISJOINT_WITH {
                schema.disjoint.push((subject, triple.object.clone()));
            } else if p == rdf::TYPE {
                let Some(property) = as_property(&subject) else {
                    continue;
                };
                if triple.object.as_ref() == TermRef::from(owl::SYMMETRIC_PROPERTY) {
                    schema.symmetric.insert(property.clone(), RlRule::PrpSymp);
                } else if triple.object.as_ref() == TermRef::from(owl::TRANSITIVE_PROPERTY) {
                    schema.transitive.insert(property.clone(), RlRule::PrpTrp);
                }
            } else if let Some(property) = as_property(&subject) {
                if p == rdfs::DOMAIN {
                    schema
                        .domains
                        .entry(property.clone())
                        .or_default()
                        .push(triple.object.clone());
                } else if p == rdfs::RANGE {
                    schema
                        .ranges
                        .entry(property.clone())
                        .or_default()
                        .push(triple.object.clone());
                } else if let Some(other) = as_property(&triple.object) {
                    if p == rdfs::SUB_PROPERTY_OF {
                        schema
                            .super_properties
                            .entry(property.clone())
                            .or_default()
                            .push((other.clone(), RlRule::PrpSpo1));
                    } else if p == owl::EQUIVALENT_PROPERTY {
                        schema
                            .super_properties
                            .entry(property.clone())
                            .or_default()
                            .push((other.clone(), RlRule::PrpEqp1));
                        schema
                            .super_properties
                            .entry(other.clone())
                            .or_default()
                            .push((property.clone(), RlRule::PrpEqp2));
                    } else if p == owl::INVERSE_OF {
                        schema
                            .inverses
                            .entry(property.clone())
                            .or_default()
                            .push((other.clone(), RlRule::PrpInv1));
                        schema
                            .inverses
                            .entry(other.clone())
                            .or_default()
                            .push((property.clone(), RlRule::PrpInv2));
                    }
                }
            }
        }

        for triple in facts {
            if schema.transitive.contains_key(&triple.predicate) {
                schema
                    .transitive_values
                    .entry((triple.subject.clone(), triple.predicate.clone()))
                    .or_default()
                    .push(triple.object.clone());
            }
        }
        schema
    }

    fn apply(&self, triple: &Triple, out: &mut Derivation<'_>) {
        let Triple {
            subject,
            predicate,
            object,
        } = triple;
        if *predicate == rdf::TYPE {
            for (class, rule) in self.super_classes.get(object).into_iter().flatten() {
                out.derive(Triple::new(subject.clone(), rdf::TYPE, class.clone()), *rule);
            }
        }
        for class in self.domains.get(predicate).into_iter().flatten() {
            out.derive(
                Triple::new(subject.clone(), rdf::TYPE, class.clone()),
                RlRule::PrpDom,
            );
        }
        for (property, rule) in self.super_properties.get(predicate).into_iter().flatten() {
            out.derive(
                Triple::new(subject.clone(), property.clone(), object.clone()),
                *rule,
            );
        }

        let Some(object) = as_resource(object) else {
            return;
        };
        for class in self.ranges.get(predicate).into_iter().flatten() {
            out.derive(
                Triple::new(object.clone(), rdf::TYPE, class.clone()),
                RlRule::PrpRng,
            );
        }
        if let Some(rule) = self.symmetric.get(predicate) {
            out.derive(
                Triple::new(object.clone(), predicate.clone(), subject.clone()),
                *rule,
            );
        }
        for (property, rule) in self.inverses.get(predicate).into_iter().flatten() {
            out.derive(
                Triple::new(object.clone(), property.clone(), subject.clone()),
                *rule,
            );
        }
        if let Some(rule) = self.transitive.get(predicate) {
            let key = (object, predicate.clone());
            for next in self.transitive_values.get(&key).into_iter().flatten() {
                out.derive(
                    Triple::new(subject.clone(), predicate.clone(), next.clone()),
                    *rule,
                );
            }
        }
    }

    fn check_consistency(&self, facts: &[Triple]) -> Result<(), ReasoningError> {
        let mut types = FxHashMap::<&NamedOrBlankNode, FxHashSet<&Term>>::default();
        for triple in facts.iter().filter(|t| t.predicate == rdf::TYPE) {
            if triple.object.as_ref() == TermRef::from(owl::NOTHING) {
                return Err(ReasoningError::inconsistent(format!(
                    "The ontology is inconsistent: {} is an instance of owl:Nothing (cls-nothing2)",
                    triple.subject
                )));
            }
            types.entry(&triple.subject).or_default().insert(&triple.object);
        }
        for (first, second) in &self.disjoint {
            for (individual, classes) in &types {
                if classes.contains(first) && classes.contains(second) {
                    return Err(ReasoningError::inconsistent(format!(
                        "The ontology is inconsistent: {individual} is an instance of the disjoint classes {first} and {second} (cax-dw)"
                    )));
                }
            }
        }
        Ok(())
    }
}

struct Derivation<'a> {
    known: &'a FxHashSet<Triple>,
    seen: FxHashSet<Triple>,
    new: Vec<Triple>,
    fired: &'a mut FxHashMap<RlRule, usize>,
}

impl Derivation<'_> {
    fn derive(&mut self, triple: Triple, rule: RlRule) {
        if !self.known.contains(&triple) && self.seen.insert(triple.clone()) {
            *self.fired.entry(rule).or_default() += 1;
            self.new.push(triple);
        }
    }
}

fn as_resource(term: &Term) -> Option<NamedOrBlankNode> {
    match term {
        Term::NamedNode(node) => Some(node.clone().into()),
        Term::BlankNode(node) => Some(node.clone().into()),
        _ => None,
    }
}

fn as_property(term: &Term) -> Option<&NamedNode> {
    if let Term::NamedNode(node) = term {
        Some(node)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use oxigraph::model::NamedNodeRef;
    use std::error::Error;

    fn ex(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.org/team#{name}"))
    }

    fn triple(s: &str, p: NamedNodeRef<'_>, o: &str) -> Triple {
        Triple::new(ex(s), p, ex(o))
    }

    fn materialize(asserted: &[Triple]) -> Result<Vec<Triple>, ReasoningError> {
        RuleReasoner::default().materialize(asserted, &CancellationToken::new())
    }

    #[test]
    fn class_hierarchy() -> Result<(), Box<dyn Error>> {
        let inferred = materialize(&[
            triple("Striker", rdfs::SUB_CLASS_OF, "Player"),
            triple("Player", rdfs::SUB_CLASS_OF, "Person"),
            triple("Person", owl::EQUIVALENT_CLASS, "Human"),
            triple("Alice", rdf::TYPE, "Striker"),
        ])?;
        for expected in [
            triple("Striker", rdfs::SUB_CLASS_OF, "Person"),
            triple("Alice", rdf::TYPE, "Player"),
            triple("Alice", rdf::TYPE, "Person"),
            triple("Alice", rdf::TYPE, "Human"),
        ] {
            assert!(inferred.contains(&expected), "{expected} not inferred");
        }
        Ok(())
    }

    #[test]
    fn property_rules() -> Result<(), Box<dyn Error>> {
        let inferred = materialize(&[
            triple("coaches", rdfs::DOMAIN, "Coach"),
            triple("coaches", rdfs::RANGE, "Player"),
            triple("coaches", rdfs::SUB_PROPERTY_OF, "knows"),
            triple("coaches", owl::INVERSE_OF, "coachedBy"),
            triple("knows", rdf::TYPE, "unused"),
            Triple::new(ex("knows"), rdf::TYPE, owl::SYMMETRIC_PROPERTY),
            Triple::new(ex("partOf"), rdf::TYPE, owl::TRANSITIVE_PROPERTY),
            triple("Carol", ex("coaches").as_ref(), "Alice"),
            triple("Alice", ex("partOf").as_ref(), "Attack"),
            triple("Attack", ex("partOf").as_ref(), "Team"),
        ])?;
        for expected in [
            triple("Carol", rdf::TYPE, "Coach"),
            triple("Alice", rdf::TYPE, "Player"),
            triple("Carol", ex("knows").as_ref(), "Alice"),
            triple("Alice", ex("knows").as_ref(), "Carol"),
            triple("Alice", ex("coachedBy").as_ref(), "Carol"),
            triple("Alice", ex("partOf").as_ref(), "Team"),
        ] {
            assert!(inferred.contains(&expected), "{expected} not inferred");
        }
        Ok(())
    }

    #[test]
    fn same_as_is_an_equivalence() -> Result<(), Box<dyn Error>> {
        let inferred = materialize(&[
            triple("Bob", owl::SAME_AS, "Robert"),
            triple("Robert", owl::SAME_AS, "Bobby"),
        ])?;
        assert!(inferred.contains(&triple("Robert", owl::SAME_AS, "Bob")));
        assert!(inferred.contains(&triple("Bob", owl::SAME_AS, "Bobby")));
        assert!(inferred.contains(&triple("Bobby", owl::SAME_AS, "Bob")));
        Ok(())
    }

    #[test]
    fn nothing_new_to_infer() -> Result<(), Box<dyn Error>> {
        let inferred = materialize(&[triple("Alice", rdf::TYPE, "Player")])?;
        assert!(inferred.is_empty());
        Ok(())
    }

    #[test]
    fn disjoint_classes_are_inconsistent() {
        let result = materialize(&[
            triple("Goalkeeper", owl::DISJOINT_WITH, "Striker"),
            triple("Alice", rdf::TYPE, "Goalkeeper"),
            triple("Alice", rdf::TYPE, "Striker"),
        ]);
        let Err(error) = result else {
            unreachable!("Alice can not be in two disjoint classes")
        };
        assert_eq!(error.kind(), ReasoningErrorKind::Inconsistent);
        assert!(error.message().contains("Alice"), "{error}");
        assert!(error.message().ends_with("(cax-dw)"), "{error}");
    }

    #[test]
    fn nothing_has_no_instances() {
        let result = materialize(&[
            Triple::new(ex("Ghost"), rdfs::SUB_CLASS_OF, owl::NOTHING),
            triple("Casper", rdf::TYPE, "Ghost"),
        ]);
        let Err(error) = result else {
            unreachable!("owl:Nothing can not have instances")
        };
        assert_eq!(error.kind(), ReasoningErrorKind::Inconsistent);
        assert!(error.message().ends_with("(cls-nothing2)"), "{error}");
    }

    #[test]
    fn iteration_budget() {
        let reasoner = RuleReasoner::new(RuleReasonerConfig {
            max_iterations: 1,
            timeout: None,
        });
        let result = reasoner.materialize(
            &[
                triple("Striker", rdfs::SUB_CLASS_OF, "Player"),
                triple("Alice", rdf::TYPE, "Striker"),
            ],
            &CancellationToken::new(),
        );
        assert!(
            matches!(result, Err(e) if e.kind() == ReasoningErrorKind::MaxIterationsExceeded)
        );
    }

    #[test]
    fn cancelled_before_the_first_round() {
        let token = CancellationToken::new();
        token.cancel();
        let result = RuleReasoner::default().materialize(&[], &token);
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::Cancelled));
    }
}
