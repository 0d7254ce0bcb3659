//! Convert a [`TimeProfile`] into a pprof [`Profile`].
//!
//! Every frame with a non-zero self weight becomes one sample whose stack is
//! the frame and its ancestors, optionally followed by a thread and a process
//! pseudo-frame. Locations are shared between samples of the same thread,
//! functions are shared across the whole profile.

use crate::annotations::ProcessAnnotations;
use crate::diagnostics::Warning;
use crate::time_profile::{FrameId, Process, Thread, TimeProfile};
use pprof_parse::{Function, Line, Location, Profile, Sample, ValueType};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Controls the shape of the generated stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Leave the process pseudo-frame off every stack.
    pub exclude_processes_from_stack: bool,
    /// Leave the thread pseudo-frame off every stack.
    pub exclude_threads_from_stack: bool,
    /// Show pids and tids in pseudo-frame names.
    pub include_ids: bool,
    pub annotations: ProcessAnnotations,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            exclude_processes_from_stack: false,
            exclude_threads_from_stack: false,
            include_ids: true,
            annotations: ProcessAnnotations::default(),
        }
    }
}

/// A pprof profile plus the warnings raised while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub profile: Profile,
    pub warnings: Vec<Warning>,
}

/// Pseudo-frames get their own key spaces so a symbol can never collide
/// with a thread or process label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LocationKey {
    Frame { symbol: String, pid: u64, tid: u64 },
    Thread { label: String, pid: u64, tid: u64 },
    Process { label: String, pid: u64 },
}

/// Convert `profile` with `config`.
pub fn convert(profile: &TimeProfile, config: &ConverterConfig) -> Converted {
    ProfileConverter::new(config).convert(profile)
}

/// Accumulates the deduplicated tables while walking the trees.
pub struct ProfileConverter<'a> {
    config: &'a ConverterConfig,
    function_ids: HashMap<String, u64>,
    functions: Vec<Function>,
    location_ids: HashMap<LocationKey, u64>,
    locations: Vec<Location>,
    samples: Vec<Sample>,
    annotated_pids: BTreeSet<u64>,
}

impl<'a> ProfileConverter<'a> {
    pub fn new(config: &'a ConverterConfig) -> Self {
        Self {
            config,
            function_ids: HashMap::new(),
            functions: Vec::new(),
            location_ids: HashMap::new(),
            locations: Vec::new(),
            samples: Vec::new(),
            annotated_pids: BTreeSet::new(),
        }
    }

    pub fn convert(mut self, profile: &TimeProfile) -> Converted {
        let mut warnings = Vec::new();
        if self.config.exclude_processes_from_stack && !self.config.annotations.is_empty() {
            warnings.push(Warning::AnnotationsIgnored);
        }

        for process in &profile.processes {
            for thread in &process.threads {
                for id in thread.walk() {
                    if thread.frame(id).self_weight_ns != 0 {
                        let sample = self.sample(process, thread, id);
                        self.samples.push(sample);
                    }
                }
            }
        }

        let unused: Vec<(u64, String)> = self
            .config
            .annotations
            .iter()
            .filter(|(pid, _)| !self.annotated_pids.contains(pid))
            .map(|(pid, text)| (pid, text.to_string()))
            .collect();
        if !unused.is_empty() {
            warnings.push(Warning::UnusedAnnotations(unused));
        }

        log::debug!(
            "converted {} samples, {} locations, {} functions",
            self.samples.len(),
            self.locations.len(),
            self.functions.len()
        );

        Converted {
            profile: Profile {
                sample_types: vec![ValueType::new("cpu", "nanoseconds")],
                samples: self.samples,
                locations: self.locations,
                functions: self.functions,
                ..Profile::default()
            },
            warnings,
        }
    }

    fn sample(&mut self, process: &Process, thread: &Thread, leaf: FrameId) -> Sample {
        let mut location_ids: Vec<u64> = thread
            .ancestors(leaf)
            .map(|(_, frame)| {
                let key = LocationKey::Frame {
                    symbol: frame.symbol_name.clone(),
                    pid: process.pid,
                    tid: thread.tid,
                };
                self.location_id(key, &frame.symbol_name)
            })
            .collect();

        if !self.config.exclude_threads_from_stack {
            let label = self.thread_label(thread);
            let key = LocationKey::Thread {
                label: label.clone(),
                pid: process.pid,
                tid: thread.tid,
            };
            location_ids.push(self.location_id(key, &label));
        }
        if !self.config.exclude_processes_from_stack {
            let label = self.process_label(process);
            let key = LocationKey::Process {
                label: label.clone(),
                pid: process.pid,
            };
            location_ids.push(self.location_id(key, &label));
        }

        let labels = BTreeMap::from([
            ("pid".to_string(), vec![process.pid.to_string()]),
            ("tid".to_string(), vec![thread.tid.to_string()]),
            ("process_name".to_string(), vec![process.name.clone()]),
            ("thread_name".to_string(), vec![thread.name.clone()]),
        ]);

        Sample {
            location_ids,
            values: vec![thread.frame(leaf).self_weight_ns],
            labels,
            num_labels: BTreeMap::new(),
        }
    }

    fn thread_label(&self, thread: &Thread) -> String {
        if self.config.include_ids {
            format!("{} [tid: {:#x}]", thread.name, thread.tid)
        } else {
            thread.name.clone()
        }
    }

    fn process_label(&mut self, process: &Process) -> String {
        let mut label = if self.config.include_ids {
            format!("{} [pid: {}]", process.name, process.pid)
        } else {
            process.name.clone()
        };
        if process.pid != 0
            && let Some(annotation) = self.config.annotations.get(process.pid)
        {
            label.push_str(&format!(" [{annotation}]"));
            self.annotated_pids.insert(process.pid);
        }
        label
    }

    fn location_id(&mut self, key: LocationKey, name: &str) -> u64 {
        if let Some(&id) = self.location_ids.get(&key) {
            return id;
        }
        let id = self.locations.len() as u64 + 1;
        let function_id = self.function_id(name);
        self.locations.push(Location {
            id,
            lines: vec![Line {
                function_id,
                line: 0,
            }],
            ..Location::default()
        });
        self.location_ids.insert(key, id);
        id
    }

    fn function_id(&mut self, name: &str) -> u64 {
        if let Some(&id) = self.function_ids.get(name) {
            return id;
        }
        let id = self.functions.len() as u64 + 1;
        self.functions.push(Function {
            id,
            name: name.to_string(),
            system_name: name.to_string(),
            ..Function::default()
        });
        self.function_ids.insert(name.to_string(), id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_profile::Frame;

    /// P [123] / T [0x1] / a -> b -> c, only `c` has self weight.
    fn simple_profile() -> TimeProfile {
        let mut thread = Thread::new("T", 1);
        let a = thread.add_root(Frame::new("a", 0, 2));
        let b = thread.add_child(a, Frame::new("b", 0, 3));
        thread.add_child(b, Frame::new("c", 100, 4));

        let mut process = Process::new("P", 123);
        process.threads.push(thread);
        TimeProfile {
            processes: vec![process],
        }
    }

    fn stacks(profile: &Profile) -> Vec<Vec<&str>> {
        profile
            .samples
            .iter()
            .map(|sample| profile.sample_function_names(sample))
            .collect()
    }

    #[test]
    fn emits_leaf_first_stack_with_pseudo_frames() {
        let converted = convert(&simple_profile(), &ConverterConfig::default());
        assert!(converted.warnings.is_empty());

        let profile = &converted.profile;
        profile.check_valid().unwrap();
        assert_eq!(
            profile.sample_types,
            vec![ValueType::new("cpu", "nanoseconds")]
        );
        assert_eq!(
            stacks(profile),
            vec![vec!["c", "b", "a", "T [tid: 0x1]", "P [pid: 123]"]]
        );
        assert_eq!(profile.samples[0].values, vec![100]);

        let labels = &profile.samples[0].labels;
        assert_eq!(labels["pid"], vec!["123"]);
        assert_eq!(labels["tid"], vec!["1"]);
        assert_eq!(labels["process_name"], vec!["P"]);
        assert_eq!(labels["thread_name"], vec!["T"]);
    }

    #[test]
    fn frames_without_self_weight_emit_no_sample() {
        let mut profile = simple_profile();
        let thread = &mut profile.processes[0].threads[0];
        let root = thread.roots()[0];
        thread.frame_mut(root).self_weight_ns = 7;

        let converted = convert(&profile, &ConverterConfig::default());
        assert_eq!(
            stacks(&converted.profile),
            vec![
                vec!["a", "T [tid: 0x1]", "P [pid: 123]"],
                vec!["c", "b", "a", "T [tid: 0x1]", "P [pid: 123]"],
            ]
        );
    }

    #[test]
    fn excluding_threads_drops_only_the_thread_frame() {
        let config = ConverterConfig {
            exclude_threads_from_stack: true,
            ..ConverterConfig::default()
        };
        let converted = convert(&simple_profile(), &config);
        assert_eq!(
            stacks(&converted.profile),
            vec![vec!["c", "b", "a", "P [pid: 123]"]]
        );
        assert_eq!(converted.profile.samples[0].labels["tid"], vec!["1"]);
    }

    #[test]
    fn excluding_processes_drops_only_the_process_frame() {
        let config = ConverterConfig {
            exclude_processes_from_stack: true,
            ..ConverterConfig::default()
        };
        let converted = convert(&simple_profile(), &config);
        assert_eq!(
            stacks(&converted.profile),
            vec![vec!["c", "b", "a", "T [tid: 0x1]"]]
        );
        assert_eq!(converted.profile.samples[0].labels["pid"], vec!["123"]);
    }

    #[test]
    fn excluding_ids_uses_plain_names() {
        let config = ConverterConfig {
            include_ids: false,
            ..ConverterConfig::default()
        };
        let converted = convert(&simple_profile(), &config);
        assert_eq!(stacks(&converted.profile), vec![vec!["c", "b", "a", "T", "P"]]);
    }

    #[test]
    fn locations_are_shared_within_a_thread_only() {
        let mut thread1 = Thread::new("T1", 1);
        let a = thread1.add_root(Frame::new("a", 1, 2));
        thread1.add_child(a, Frame::new("x", 1, 3));
        thread1.add_root(Frame::new("x", 1, 2));
        let mut thread2 = Thread::new("T2", 2);
        thread2.add_root(Frame::new("x", 1, 2));

        let mut process = Process::new("P", 9);
        process.threads = vec![thread1, thread2];
        let config = ConverterConfig {
            exclude_threads_from_stack: true,
            exclude_processes_from_stack: true,
            ..ConverterConfig::default()
        };
        let converted = convert(
            &TimeProfile {
                processes: vec![process],
            },
            &config,
        );
        let profile = &converted.profile;

        let ids: Vec<Vec<u64>> = profile
            .samples
            .iter()
            .map(|s| s.location_ids.clone())
            .collect();
        // a, a->x, x (same thread as a->x), x on the other thread.
        assert_eq!(ids, vec![vec![1], vec![2, 1], vec![2], vec![3]]);

        // Two locations named x share one function.
        assert_eq!(profile.locations.len(), 3);
        assert_eq!(profile.functions.len(), 2);
        assert_eq!(
            profile.locations[1].lines[0].function_id,
            profile.locations[2].lines[0].function_id
        );
    }

    #[test]
    fn tables_are_in_id_order() {
        let converted = convert(&simple_profile(), &ConverterConfig::default());
        let location_ids: Vec<u64> = converted.profile.locations.iter().map(|l| l.id).collect();
        let function_ids: Vec<u64> = converted.profile.functions.iter().map(|f| f.id).collect();
        assert_eq!(location_ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(function_ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn symbol_named_like_a_pseudo_frame_is_not_merged() {
        let mut thread = Thread::new("T", 1);
        thread.add_root(Frame::new("T [tid: 0x1]", 5, 2));
        let mut process = Process::new("P", 123);
        process.threads.push(thread);

        let converted = convert(
            &TimeProfile {
                processes: vec![process],
            },
            &ConverterConfig::default(),
        );
        assert_eq!(converted.profile.samples[0].location_ids, vec![1, 2, 3]);
        // The frame and the thread pseudo-frame still share the function.
        assert_eq!(converted.profile.functions.len(), 2);
    }

    #[test]
    fn annotations_suffix_the_process_frame() {
        let config = ConverterConfig {
            annotations: ProcessAnnotations::from_args(["123:renderer"]).unwrap(),
            ..ConverterConfig::default()
        };
        let converted = convert(&simple_profile(), &config);
        assert!(converted.warnings.is_empty());
        assert_eq!(
            stacks(&converted.profile)[0].last(),
            Some(&"P [pid: 123] [renderer]")
        );
    }

    #[test]
    fn unmatched_annotation_is_a_warning() {
        let config = ConverterConfig {
            annotations: ProcessAnnotations::from_args(["999:x", "123:renderer"]).unwrap(),
            ..ConverterConfig::default()
        };
        let converted = convert(&simple_profile(), &config);
        assert_eq!(
            converted.warnings,
            vec![Warning::UnusedAnnotations(vec![(999, "x".to_string())])]
        );
        converted.profile.check_valid().unwrap();
    }

    #[test]
    fn pid_zero_is_never_annotated() {
        let mut profile = simple_profile();
        profile.processes[0].pid = 0;
        let config = ConverterConfig {
            annotations: ProcessAnnotations::from_args(["0:none"]).unwrap(),
            ..ConverterConfig::default()
        };
        let converted = convert(&profile, &config);
        assert_eq!(
            stacks(&converted.profile)[0].last(),
            Some(&"P [pid: 0]")
        );
        assert_eq!(
            converted.warnings,
            vec![Warning::UnusedAnnotations(vec![(0, "none".to_string())])]
        );
    }

    #[test]
    fn annotations_with_excluded_processes_warn() {
        let config = ConverterConfig {
            exclude_processes_from_stack: true,
            annotations: ProcessAnnotations::from_args(["123:renderer"]).unwrap(),
            ..ConverterConfig::default()
        };
        let converted = convert(&simple_profile(), &config);
        assert_eq!(
            converted.warnings,
            vec![
                Warning::AnnotationsIgnored,
                Warning::UnusedAnnotations(vec![(123, "renderer".to_string())]),
            ]
        );
    }

    #[test]
    fn written_profile_decodes_back() {
        let converted = convert(&simple_profile(), &ConverterConfig::default());
        let mut buf = Vec::new();
        converted.profile.write(&mut buf).unwrap();

        let decoded = Profile::parse(buf.as_slice()).unwrap();
        assert_eq!(decoded, converted.profile);
    }
}
