use super::context::RatingContext;
use super::metadata::RatingMetadata;
use super::record::{MetadataRecord, VirtualRecord};
use super::source::{check_source_cycles, SourceRating};
use super::{rate_in_data_units, reverse_in_data_units, set_data_units, Rate};
use crate::error::{RatingError, RatingResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// A connection point in a virtual rating graph. Indices are 0-based; the
/// textual form is 1-based (`I1`, `R2I1`, `R2D`, `D`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Port {
    /// Independent input of the virtual rating.
    Input(usize),
    SourceInput { rating: usize, param: usize },
    SourceOutput { rating: usize },
    /// Dependent output of the virtual rating.
    Output,
}

impl Port {
    fn rating(&self) -> Option<usize> {
        match self {
            Port::SourceInput { rating, .. } | Port::SourceOutput { rating } => Some(*rating),
            Port::Input(_) | Port::Output => None,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Input(index) => write!(f, "I{}", index + 1),
            Port::SourceInput { rating, param } => write!(f, "R{}I{}", rating + 1, param + 1),
            Port::SourceOutput { rating } => write!(f, "R{}D", rating + 1),
            Port::Output => f.write_str("D"),
        }
    }
}

fn ordinal(digits: &str, text: &str) -> RatingResult<usize> {
    digits
        .parse::<usize>()
        .ok()
        .filter(|value| *value >= 1)
        .map(|value| value - 1)
        .ok_or_else(|| RatingError::configuration(format!("invalid connection port \"{text}\"")))
}

impl FromStr for Port {
    type Err = RatingError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let upper = text.trim().to_ascii_uppercase();
        if upper == "D" {
            return Ok(Port::Output);
        }
        if let Some(digits) = upper.strip_prefix('I') {
            return Ok(Port::Input(ordinal(digits, text)?));
        }
        let Some(rest) = upper.strip_prefix('R') else {
            return Err(RatingError::configuration(format!(
                "invalid connection port \"{text}\""
            )));
        };
        if let Some(digits) = rest.strip_suffix('D') {
            return Ok(Port::SourceOutput {
                rating: ordinal(digits, text)?,
            });
        }
        match rest.split_once('I') {
            Some((rating, param)) => Ok(Port::SourceInput {
                rating: ordinal(rating, text)?,
                param: ordinal(param, text)?,
            }),
            None => Err(RatingError::configuration(format!(
                "invalid connection port \"{text}\""
            ))),
        }
    }
}

/// One evaluation step of a compiled connection graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Copy { from: Port, to: Port },
    Forward(usize),
    Reverse(usize),
}

type Graph = BTreeMap<Port, BTreeSet<Port>>;

/// Rating composed from source ratings wired together by a connection string.
#[derive(Debug, Clone)]
pub struct VirtualRating {
    meta: RatingMetadata,
    ctx: RatingContext,
    sources: Vec<SourceRating>,
    connections: String,
    graph: Graph,
    output: Port,
    schedule: Vec<Step>,
    reverse_schedule: Option<Vec<Step>>,
}

impl VirtualRating {
    pub fn new(
        meta: RatingMetadata,
        ctx: RatingContext,
        sources: Vec<SourceRating>,
        connections: &str,
    ) -> RatingResult<Self> {
        let mut rating = Self {
            meta,
            ctx,
            sources,
            connections: connections.to_string(),
            graph: Graph::new(),
            output: Port::Output,
            schedule: Vec::new(),
            reverse_schedule: None,
        };
        rating.compile()?;
        Ok(rating)
    }

    pub fn metadata(&self) -> &RatingMetadata {
        &self.meta
    }

    pub fn context(&self) -> &RatingContext {
        &self.ctx
    }

    pub fn sources(&self) -> &[SourceRating] {
        &self.sources
    }

    pub fn connections(&self) -> &str {
        &self.connections
    }

    /// The source port whose value is this rating's output.
    pub fn output_port(&self) -> Port {
        self.output
    }

    /// Connections after auto-binding, one `A=B` pair per edge.
    pub fn resolved_connections(&self) -> Vec<String> {
        let mut pairs = Vec::new();
        for (from, neighbors) in &self.graph {
            for to in neighbors.iter().filter(|to| from < *to) {
                pairs.push(format!("{from}={to}"));
            }
        }
        pairs
    }

    pub fn set_sources(&mut self, sources: Vec<SourceRating>) -> RatingResult<()> {
        let previous = std::mem::replace(&mut self.sources, sources);
        if let Err(err) = self.compile() {
            self.sources = previous;
            self.compile()?;
            return Err(err);
        }
        Ok(())
    }

    pub fn set_connections(&mut self, connections: &str) -> RatingResult<()> {
        let previous = std::mem::replace(&mut self.connections, connections.to_string());
        if let Err(err) = self.compile() {
            self.connections = previous;
            self.compile()?;
            return Err(err);
        }
        Ok(())
    }

    pub fn set_data_units(&mut self, units: Option<Vec<String>>) -> RatingResult<()> {
        set_data_units(&mut self.meta, &self.ctx, units)
    }

    pub fn set_effective_date(&mut self, effective_date: DateTime<Utc>) {
        self.meta.effective_date = effective_date;
    }

    pub fn set_active(&mut self, active: bool) {
        self.meta.active = active;
    }

    fn compile(&mut self) -> RatingResult<()> {
        if self.sources.is_empty() {
            return Err(RatingError::configuration(format!(
                "virtual rating {} has no source ratings",
                self.meta.spec_id
            )));
        }
        check_source_cycles(&self.meta, &self.sources)?;

        let (graph, output) = self.bind_ports()?;
        let inputs: Vec<Port> = (0..self.meta.ind_param_count()).map(Port::Input).collect();
        let schedule = plan(&graph, &self.sources, &inputs, output)?;
        for step in &schedule {
            if let Step::Copy { from, to } = step {
                self.ctx
                    .check_unit_pair(self.port_unit(*from)?, self.port_unit(*to)?)?;
            }
        }
        self.ctx
            .check_unit_pair(self.port_unit(output)?, self.port_unit(Port::Output)?)?;

        let reversible = self.meta.ind_param_count() == 1
            && self
                .sources
                .iter()
                .all(|source| !source.is_expression() && source.ind_param_count() == 1);
        let reverse_schedule = if reversible {
            match plan(&graph, &self.sources, &[output], Port::Input(0)) {
                Ok(steps) => Some(steps),
                Err(err) => {
                    debug!(spec = %self.meta.spec_id, error = %err, "virtual rating has no reverse path");
                    None
                }
            }
        } else {
            None
        };

        self.graph = graph;
        self.output = output;
        self.schedule = schedule;
        self.reverse_schedule = reverse_schedule;
        Ok(())
    }

    fn check_port(&self, port: Port) -> RatingResult<()> {
        let valid = match port {
            Port::Input(index) => index < self.meta.ind_param_count(),
            Port::SourceInput { rating, param } => self
                .sources
                .get(rating)
                .is_some_and(|source| param < source.ind_param_count()),
            Port::SourceOutput { rating } => rating < self.sources.len(),
            Port::Output => true,
        };
        if valid {
            Ok(())
        } else {
            Err(RatingError::configuration(format!(
                "connection port {port} does not exist in virtual rating {}",
                self.meta.spec_id
            )))
        }
    }

    fn parse_connections(&self) -> RatingResult<Graph> {
        let mut graph = Graph::new();
        for pair in self.connections.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let Some((left, right)) = pair.split_once('=') else {
                return Err(RatingError::configuration(format!(
                    "invalid connection \"{pair}\"; expected A=B"
                )));
            };
            let (left, right) = (left.parse::<Port>()?, right.parse::<Port>()?);
            self.check_port(left)?;
            self.check_port(right)?;

            let same_rating = left.rating().is_some() && left.rating() == right.rating();
            let both_own = left.rating().is_none() && right.rating().is_none();
            if left == right || same_rating || both_own {
                return Err(RatingError::configuration(format!(
                    "connection \"{pair}\" does not join two different ratings"
                )));
            }

            let added = graph.entry(left).or_default().insert(right);
            graph.entry(right).or_default().insert(left);
            if !added {
                warn!(spec = %self.meta.spec_id, connection = pair, "duplicate virtual rating connection");
            }
        }
        Ok(graph)
    }

    /// Parses the connection text, auto-binds free source ports to the
    /// inputs and identifies the output port.
    fn bind_ports(&self) -> RatingResult<(Graph, Port)> {
        let mut graph = self.parse_connections()?;

        let explicit_output = match graph.get(&Port::Output) {
            None => None,
            Some(ports) if ports.len() == 1 => ports.iter().next().copied(),
            Some(ports) => {
                return Err(RatingError::configuration(format!(
                    "D is connected to {} ports in virtual rating {}",
                    ports.len(),
                    self.meta.spec_id
                )))
            }
        };

        let mut unbound: Vec<Port> = Vec::new();
        for (rating, source) in self.sources.iter().enumerate() {
            unbound.extend(
                (0..source.ind_param_count()).map(|param| Port::SourceInput { rating, param }),
            );
            unbound.push(Port::SourceOutput { rating });
        }
        unbound.retain(|port| !graph.contains_key(port));

        let reserved = usize::from(explicit_output.is_none());
        for index in 0..self.meta.ind_param_count() {
            let input = Port::Input(index);
            if graph.contains_key(&input) {
                continue;
            }
            if unbound.len() <= reserved {
                break;
            }
            let port = unbound.remove(0);
            debug!(spec = %self.meta.spec_id, %input, %port, "auto-binding virtual rating input");
            graph.entry(input).or_default().insert(port);
            graph.entry(port).or_default().insert(input);
        }

        if unbound.len() > reserved {
            let names: Vec<String> = unbound.iter().map(Port::to_string).collect();
            return Err(RatingError::configuration(format!(
                "virtual rating {} is under-connected; unbound ports: {}",
                self.meta.spec_id,
                names.join(", ")
            )));
        }
        if let Some(index) =
            (0..self.meta.ind_param_count()).find(|index| !graph.contains_key(&Port::Input(*index)))
        {
            return Err(RatingError::configuration(format!(
                "independent parameter I{} of virtual rating {} is not connected",
                index + 1,
                self.meta.spec_id
            )));
        }

        let output = match (explicit_output, unbound.first()) {
            (Some(port), _) => port,
            (None, Some(port)) => *port,
            (None, None) => {
                return Err(RatingError::configuration(format!(
                    "virtual rating {} is over-connected; no port is left for D",
                    self.meta.spec_id
                )))
            }
        };
        if matches!(output, Port::Input(_)) {
            return Err(RatingError::configuration(format!(
                "D cannot be connected to an input of virtual rating {}",
                self.meta.spec_id
            )));
        }
        Ok((graph, output))
    }

    fn port_unit(&self, port: Port) -> RatingResult<&str> {
        let unit = match port {
            Port::Input(index) => self
                .meta
                .units_id
                .independent_units()
                .get(index)
                .map(String::as_str),
            Port::Output => Some(self.meta.units_id.dependent_unit()),
            Port::SourceInput { rating, param } => self
                .sources
                .get(rating)
                .and_then(|source| source.units().get(param))
                .map(String::as_str),
            Port::SourceOutput { rating } => self
                .sources
                .get(rating)
                .and_then(|source| source.units().last())
                .map(String::as_str),
        };
        unit.ok_or_else(|| RatingError::configuration(format!("no unit known for port {port}")))
    }

    fn run(
        &self,
        time: DateTime<Utc>,
        steps: &[Step],
        mut values: BTreeMap<Port, f64>,
        target: Port,
    ) -> RatingResult<f64> {
        let take = |values: &BTreeMap<Port, f64>, port: Port| {
            values
                .get(&port)
                .copied()
                .ok_or_else(|| RatingError::lookup(format!("no value reached port {port}")))
        };

        for step in steps {
            match *step {
                Step::Copy { from, to } => {
                    let value = take(&values, from)?;
                    let converted =
                        self.ctx.convert(value, self.port_unit(from)?, self.port_unit(to)?)?;
                    values.insert(to, converted);
                }
                Step::Forward(rating) => {
                    let source = &self.sources[rating];
                    let ind = (0..source.ind_param_count())
                        .map(|param| take(&values, Port::SourceInput { rating, param }))
                        .collect::<RatingResult<Vec<_>>>()?;
                    values.insert(Port::SourceOutput { rating }, source.rate(time, &ind)?);
                }
                Step::Reverse(rating) => {
                    let dep = take(&values, Port::SourceOutput { rating })?;
                    let ind = self.sources[rating].reverse_rate(time, dep)?;
                    values.insert(Port::SourceInput { rating, param: 0 }, ind);
                }
            }
        }
        take(&values, target)
    }

    pub fn to_record(&self) -> VirtualRecord {
        VirtualRecord {
            meta: MetadataRecord::from(&self.meta),
            connections: self.connections.clone(),
            sources: self.sources.iter().map(SourceRating::to_record).collect(),
        }
    }

    pub fn from_record(record: VirtualRecord, ctx: &RatingContext) -> RatingResult<Self> {
        let meta = record.meta.into_metadata(ctx)?;
        let sources = record
            .sources
            .into_iter()
            .map(|source| SourceRating::from_record(source, ctx))
            .collect::<RatingResult<Vec<_>>>()?;
        Self::new(meta, ctx.clone(), sources, &record.connections)
    }
}

/// Orders the evaluation of `graph` so values flow from `starts` to
/// `target`. Each source rating is evaluated once, forward when all of its
/// inputs are known and in reverse when only its output is.
fn plan(graph: &Graph, sources: &[SourceRating], starts: &[Port], target: Port) -> RatingResult<Vec<Step>> {
    let mut known: BTreeMap<Port, BTreeSet<usize>> = starts
        .iter()
        .enumerate()
        .map(|(index, port)| (*port, BTreeSet::from([index])))
        .collect();
    let mut spent: BTreeSet<Port> = BTreeSet::new();
    let mut evaluated: BTreeSet<usize> = BTreeSet::new();
    let mut steps = Vec::new();

    while !known.contains_key(&target) {
        let before = steps.len();

        let mut arrived: Vec<(Port, BTreeSet<usize>)> = Vec::new();
        for (port, origins) in &known {
            let Some(neighbors) = graph.get(port) else {
                continue;
            };
            for next in neighbors {
                if *next == Port::Output || spent.contains(next) || known.contains_key(next) {
                    continue;
                }
                spent.insert(*port);
                steps.push(Step::Copy { from: *port, to: *next });
                arrived.push((*next, origins.clone()));
            }
        }
        for port in &spent {
            known.remove(port);
        }
        for (port, origins) in arrived {
            known.entry(port).or_default().extend(origins);
        }

        for (rating, source) in sources.iter().enumerate() {
            if evaluated.contains(&rating) {
                continue;
            }
            let inputs: Vec<Port> = (0..source.ind_param_count())
                .map(|param| Port::SourceInput { rating, param })
                .collect();
            let output = Port::SourceOutput { rating };
            if inputs.iter().all(|port| known.contains_key(port)) {
                let mut origins = BTreeSet::new();
                for port in &inputs {
                    origins.extend(known.remove(port).unwrap_or_default());
                }
                known.insert(output, origins);
                evaluated.insert(rating);
                steps.push(Step::Forward(rating));
            } else if let Some(origins) = known.remove(&output) {
                if source.is_expression() || source.ind_param_count() != 1 {
                    return Err(RatingError::configuration(format!(
                        "connections require reverse rating through R{}, which has {} input(s){}",
                        rating + 1,
                        source.ind_param_count(),
                        if source.is_expression() { " and is an expression" } else { "" }
                    )));
                }
                known.insert(Port::SourceInput { rating, param: 0 }, origins);
                evaluated.insert(rating);
                steps.push(Step::Reverse(rating));
            }
        }

        if steps.len() == before {
            return Err(RatingError::configuration(format!(
                "connections never reach {target}"
            )));
        }
    }

    let reached = known.get(&target).map(BTreeSet::len).unwrap_or_default();
    if reached != starts.len() {
        let missing: Vec<String> = starts
            .iter()
            .enumerate()
            .filter(|(index, _)| !known.get(&target).is_some_and(|origins| origins.contains(index)))
            .map(|(_, port)| port.to_string())
            .collect();
        return Err(RatingError::configuration(format!(
            "{} never reach {target}",
            missing.join(", ")
        )));
    }
    Ok(steps)
}

impl Rate for VirtualRating {
    fn ind_param_count(&self) -> usize {
        self.meta.ind_param_count()
    }

    fn rate(&self, time: DateTime<Utc>, ind: &[f64]) -> RatingResult<f64> {
        rate_in_data_units(&self.meta, &self.ctx, ind, |values| {
            let start = values
                .iter()
                .enumerate()
                .map(|(index, value)| (Port::Input(index), *value))
                .collect();
            let result = self.run(time, &self.schedule, start, self.output)?;
            self.ctx
                .convert(result, self.port_unit(self.output)?, self.port_unit(Port::Output)?)
        })
    }

    fn reverse_rate(&self, time: DateTime<Utc>, dep: f64) -> RatingResult<f64> {
        let Some(steps) = &self.reverse_schedule else {
            return Err(RatingError::unsupported(format!(
                "virtual rating {} cannot be reverse rated",
                self.meta.spec_id
            )));
        };
        reverse_in_data_units(&self.meta, &self.ctx, dep, |value| {
            let value = self
                .ctx
                .convert(value, self.port_unit(Port::Output)?, self.port_unit(self.output)?)?;
            self.run(time, steps, BTreeMap::from([(self.output, value)]), Port::Input(0))
        })
    }

    fn extents(&self, _time: DateTime<Utc>) -> RatingResult<Vec<(f64, f64)>> {
        Err(RatingError::unsupported(format!(
            "virtual rating {} has no extents",
            self.meta.spec_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::method::RatingMethodSet;
    use crate::ratings::series::RatingSeries;
    use crate::ratings::tabular::TableRating;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    fn units(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn series(spec: &str, units_id: &str, pairs: &[(f64, f64)]) -> Arc<RatingSeries> {
        let meta = RatingMetadata::parse("SWT", spec, units_id, at()).expect("valid metadata");
        let rating = TableRating::from_pairs(meta, RatingContext::standard(), pairs, RatingMethodSet::default())
            .expect("valid table");
        Arc::new(RatingSeries::from_ratings(vec![rating.into()]).expect("valid series"))
    }

    fn meta(spec: &str, units_id: &str) -> RatingMetadata {
        RatingMetadata::parse("SWT", spec, units_id, at()).expect("valid metadata")
    }

    #[test]
    fn ports_round_trip_their_text_form() {
        for text in ["I1", "R2I3", "R10D", "D"] {
            let port: Port = text.parse().expect("valid port");
            assert_eq!(port.to_string(), text);
        }
        assert_eq!("r1i2".parse::<Port>().expect("case-insensitive"), Port::SourceInput { rating: 0, param: 1 });
        for text in ["", "X1", "I0", "R1", "R1X"] {
            assert!(text.parse::<Port>().is_err(), "{text} should not parse");
        }
    }

    #[test]
    fn chains_two_ratings_forward_and_backward() {
        let ctx = RatingContext::standard();
        let stage_elev = series("KEYS.Stage;Elev.Linear.Production", "ft;ft", &[(0.0, 700.0), (100.0, 800.0)]);
        let elev_stor = series("KEYS.Elev;Stor.Linear.Production", "ft;ac-ft", &[(700.0, 0.0), (800.0, 1000.0)]);
        let sources = vec![SourceRating::series(stage_elev, &ctx), SourceRating::series(elev_stor, &ctx)];

        let rating = VirtualRating::new(
            meta("KEYS.Stage;Stor.Virtual.Production", "ft;ac-ft"),
            ctx,
            sources,
            "R1D=R2I1",
        )
        .expect("valid graph");

        assert_eq!(rating.output_port(), Port::SourceOutput { rating: 1 });
        assert!(rating.resolved_connections().contains(&"I1=R1I1".to_string()));
        assert!((rating.rate(at(), &[50.0]).expect("rates") - 500.0).abs() < 1e-9);
        assert!((rating.reverse_rate(at(), 250.0).expect("reverses") - 25.0).abs() < 1e-9);
        match rating.extents(at()) {
            Err(RatingError::Unsupported(_)) => {}
            other => panic!("expected unsupported, got {other:?}"),
        }
    }

    #[test]
    fn reverses_through_a_source_to_reach_the_output() {
        let ctx = RatingContext::standard();
        let stor_elev = series("KEYS.Elev;Stor.Linear.Production", "ft;ac-ft", &[(700.0, 0.0), (800.0, 1000.0)]);
        let rating = VirtualRating::new(
            meta("KEYS.Stor;Elev.Virtual.Production", "ac-ft;ft"),
            ctx.clone(),
            vec![SourceRating::series(stor_elev, &ctx)],
            "I1=R1D",
        )
        .expect("valid graph");

        assert_eq!(rating.output_port(), Port::SourceInput { rating: 0, param: 0 });
        assert!((rating.rate(at(), &[500.0]).expect("rates") - 750.0).abs() < 1e-9);
    }

    #[test]
    fn converts_units_between_connected_ports() {
        let ctx = RatingContext::standard();
        let metric = series("KEYS.Stage;Flow.Linear.Production", "m;cms", &[(0.0, 0.0), (10.0, 100.0)]);
        let rating = VirtualRating::new(
            meta("KEYS.Stage;Flow.Virtual.Production", "m;cms"),
            ctx.clone(),
            vec![SourceRating::expression("I1 * 2", units(&["ft", "ft"]), &ctx).expect("valid"),
                 SourceRating::series(metric, &ctx)],
            "I1=R1I1,R1D=R2I1",
        )
        .expect("valid graph");

        // 1 m -> 3.28084 ft -> 6.56168 ft -> 2 m -> 20 cms
        let flow = rating.rate(at(), &[1.0]).expect("rates");
        assert!((flow - 20.0).abs() < 1e-6);
        match rating.reverse_rate(at(), 20.0) {
            Err(RatingError::Unsupported(_)) => {}
            other => panic!("expected unsupported, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_connections() {
        let ctx = RatingContext::standard();
        let a = series("KEYS.Stage;Elev.Linear.Production", "ft;ft", &[(0.0, 700.0), (100.0, 800.0)]);
        let b = series("KEYS.Elev;Stor.Linear.Production", "ft;ac-ft", &[(700.0, 0.0), (800.0, 1000.0)]);
        let sources = vec![SourceRating::series(a, &ctx), SourceRating::series(b, &ctx)];
        let target = meta("KEYS.Stage;Stor.Virtual.Production", "ft;ac-ft");

        for connections in ["R1D=R1I1", "R1D=R3I1", "R1D", "I1=I1", "R1D=R2I1,I1=R1I1,D=R2D,I2=R1I1"] {
            match VirtualRating::new(target.clone(), ctx.clone(), sources.clone(), connections) {
                Err(RatingError::Configuration(_)) => {}
                other => panic!("expected configuration error for {connections}, got {other:?}"),
            }
        }
        match VirtualRating::new(target, ctx, sources, "") {
            Err(RatingError::Configuration(message)) => assert!(message.contains("under-connected")),
            other => panic!("expected under-connection, got {other:?}"),
        }
    }

    #[test]
    fn refuses_reverse_paths_through_expressions() {
        let ctx = RatingContext::standard();
        let source = SourceRating::expression("I1 * 2", units(&["ft", "ft"]), &ctx).expect("valid");
        match VirtualRating::new(meta("KEYS.Stage;Elev.Virtual.Production", "ft;ft"), ctx, vec![source], "I1=R1D") {
            Err(RatingError::Configuration(message)) => assert!(message.contains("reverse")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }
}
