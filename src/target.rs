//! Target builder - builds and installs the downstream service.
//!
//! The service is split into build areas (service core, protocol-compiler
//! artifacts, auxiliary service). Areas share no build state, so they may run
//! concurrently, but they are released together and reported as one outcome.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;

use anyhow::bail;

use crate::error::PlanError;
use crate::step::Step;
use crate::unit::{run_steps, Failure, FailureKind, Satisfied, UnitOutcome, UnitRunner};

/// Downstream services that can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    HdSearch,
    Router,
    SetAlgebra,
    Recommend,
}

/// How an area is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AreaKind {
    /// Out-of-tree cmake build in `<area>/build` (created on demand), then
    /// privileged install.
    Cmake,
    /// Plain `make` in the area directory.
    Make,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::HdSearch,
        Service::Router,
        Service::SetAlgebra,
        Service::Recommend,
    ];

    /// Directory name of the service tree.
    pub fn dir_name(self) -> &'static str {
        match self {
            Service::HdSearch => "HDSearch",
            Service::Router => "Router",
            Service::SetAlgebra => "SetAlgebra",
            Service::Recommend => "Recommend",
        }
    }

    fn layout(self) -> &'static [(&'static str, AreaKind)] {
        use AreaKind::*;
        match self {
            Service::HdSearch => &[
                ("mid_tier_service", Cmake),
                ("protoc_files", Make),
                ("bucket_service/service", Make),
            ],
            Service::Router => &[
                ("mid_tier_service/service", Make),
                ("protoc_files", Make),
                ("lookup_service/service", Make),
            ],
            Service::SetAlgebra => &[
                ("union_service/service", Make),
                ("protoc_files", Make),
                ("intersection_service/service", Make),
            ],
            Service::Recommend => &[
                ("recommender_service/service", Make),
                ("protoc_files", Make),
                ("cf_service/service", Make),
            ],
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Service {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hdsearch" => Ok(Service::HdSearch),
            "router" => Ok(Service::Router),
            "setalgebra" => Ok(Service::SetAlgebra),
            "recommend" => Ok(Service::Recommend),
            other => bail!(
                "Unknown service '{}' (expected hdsearch, router, setalgebra or recommend)",
                other
            ),
        }
    }
}

/// One independently buildable directory of the service.
#[derive(Debug, Clone)]
pub struct BuildArea {
    pub name: String,
    pub steps: Vec<Step>,
}

impl BuildArea {
    fn new(name: &str, kind: AreaKind, dir: PathBuf) -> Self {
        let steps = match kind {
            AreaKind::Cmake => {
                let build = dir.join("build");
                vec![
                    Step::new("cmake ..", &build, ["cmake", ".."]).create_dir(),
                    Step::new("make", &build, ["make"]),
                    Step::new("make install", &build, ["make", "install"]).privileged(),
                ]
            }
            AreaKind::Make => vec![Step::new("make", &dir, ["make"])],
        };
        Self {
            name: name.to_string(),
            steps,
        }
    }
}

/// The unit that builds the downstream service once prerequisites succeed.
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    pub name: String,
    pub areas: Vec<BuildArea>,
    pub already_satisfied: Satisfied,
    /// Run areas on parallel workers.
    pub parallel: bool,
}

impl TargetBuilder {
    pub fn new(name: impl Into<String>, areas: Vec<BuildArea>) -> Self {
        Self {
            name: name.into(),
            areas,
            already_satisfied: Satisfied::Never,
            parallel: false,
        }
    }

    /// Standard layout for `service` under `root/<ServiceDir>`.
    pub fn for_service(service: Service, root: &Path) -> Self {
        let base = root.join(service.dir_name());
        let areas = service
            .layout()
            .iter()
            .map(|(rel, kind)| BuildArea::new(rel, *kind, base.join(rel)))
            .collect();
        Self::new(service.dir_name(), areas)
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// All steps in declared order, area by area.
    pub fn steps(&self) -> impl Iterator<Item = (&str, &Step)> {
        self.areas
            .iter()
            .flat_map(|a| a.steps.iter().map(move |s| (a.name.as_str(), s)))
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.areas.is_empty() {
            return Err(PlanError::EmptyTarget(self.name.clone()));
        }
        for area in &self.areas {
            if area.steps.is_empty() {
                return Err(PlanError::EmptyUnit(format!("{}/{}", self.name, area.name)));
            }
            area.steps.iter().try_for_each(Step::validate)?;
        }
        Ok(())
    }

    /// Build every area and fold the results into one outcome.
    ///
    /// Sequential mode stops at the first failing area. Parallel mode lets
    /// every area finish, then reports the first failure in declared order.
    pub fn run(&self, runner: &UnitRunner<'_>) -> UnitOutcome {
        if runner.check_enabled() && self.already_satisfied.evaluate() {
            println!("{} already built, skipping", self.name);
            return UnitOutcome::Skipped;
        }

        println!("Building {}...", self.name);
        let results = if self.parallel {
            self.run_parallel(runner)
        } else {
            self.run_sequential(runner)
        };

        let mut steps_run = 0;
        let mut first_failure = None;
        for (area, result) in self.areas.iter().zip(results) {
            match result {
                Ok(n) => steps_run += n,
                Err(failure) => {
                    tracing::error!(area = %area.name, "{}", failure.message);
                    if first_failure.is_none() {
                        first_failure = Some(failure.in_area(&area.name));
                    }
                }
            }
        }

        match first_failure {
            Some(failure) => UnitOutcome::Failed(failure),
            None => UnitOutcome::Succeeded { steps_run },
        }
    }

    fn run_sequential(&self, runner: &UnitRunner<'_>) -> Vec<Result<usize, Failure>> {
        let mut results = Vec::with_capacity(self.areas.len());
        for area in &self.areas {
            println!(" {}", area.name);
            let result = run_steps(&area.steps, runner.executor(), runner.cancel_token());
            let failed = result.is_err();
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    fn run_parallel(&self, runner: &UnitRunner<'_>) -> Vec<Result<usize, Failure>> {
        let executor = runner.executor();
        let cancel = runner.cancel_token();
        thread::scope(|scope| {
            let workers: Vec<_> = self
                .areas
                .iter()
                .map(|area| {
                    scope.spawn(move || {
                        tracing::debug!(area = %area.name, "worker started");
                        run_steps(&area.steps, executor, cancel)
                    })
                })
                .collect();

            workers
                .into_iter()
                .zip(&self.areas)
                .map(|(worker, area)| {
                    worker.join().unwrap_or_else(|_| {
                        Err(Failure {
                            area: None,
                            step_index: 0,
                            step: area.name.clone(),
                            kind: FailureKind::Execution,
                            message: format!("worker for {} panicked", area.name),
                            exit_code: None,
                            stderr: None,
                        })
                    })
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hdsearch_layout() {
        let target = TargetBuilder::for_service(Service::HdSearch, Path::new("/src"));
        let names: Vec<_> = target.areas.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["mid_tier_service", "protoc_files", "bucket_service/service"]
        );

        let mid_tier = &target.areas[0];
        let steps: Vec<_> = mid_tier.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(steps, vec!["cmake ..", "make", "make install"]);
        assert_eq!(
            mid_tier.steps[0].working_directory,
            PathBuf::from("/src/HDSearch/mid_tier_service/build")
        );
        assert!(mid_tier.steps[0].create_working_directory);
        assert!(!mid_tier.steps[1].create_working_directory);
        assert!(mid_tier.steps[2].requires_privilege);
        assert!(!mid_tier.steps[1].requires_privilege);
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_every_service_has_three_areas() {
        for service in Service::ALL {
            let target = TargetBuilder::for_service(service, Path::new("/src"));
            assert_eq!(target.areas.len(), 3, "{}", service);
            assert!(target.areas.iter().any(|a| a.name == "protoc_files"));
        }
    }

    #[test]
    fn test_service_parse() {
        assert_eq!("HDSearch".parse::<Service>().unwrap(), Service::HdSearch);
        assert_eq!("setalgebra".parse::<Service>().unwrap(), Service::SetAlgebra);
        assert!("memcached".parse::<Service>().is_err());
    }

    #[test]
    fn test_empty_target_rejected() {
        let target = TargetBuilder::new("svc", Vec::new());
        assert_eq!(target.validate(), Err(PlanError::EmptyTarget("svc".into())));
    }

    #[test]
    fn test_steps_flattened_in_order() {
        let target = TargetBuilder::for_service(Service::Router, Path::new("/r"));
        let areas: Vec<_> = target.steps().map(|(area, _)| area).collect();
        assert_eq!(
            areas,
            vec!["mid_tier_service/service", "protoc_files", "lookup_service/service"]
        );
    }
}
