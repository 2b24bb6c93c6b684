use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bytecode::{ClassFileError, ClassFileResult, ClassReader, ClassWriter};
use crate::coverage::{self, CoverageInstrumentationFilter};
use crate::csi::{CallSiteTransformer, CallSites};
use crate::descriptor::binary_to_internal;
use crate::ir::TypeDescription;
use crate::matcher::pattern::{self, Pattern};
use crate::matcher::PatternError;
use crate::matching::{BitSet, ClassMatchingCache};
use crate::tooling::advice::AdviceClassVisitor;
use crate::tooling::context::ContextStoreRegistry;
use crate::tooling::ignores::GlobalIgnores;
use crate::tooling::matcher::{HierarchyMatcher, MethodMatcher, TypeMatcher};
use crate::tooling::module::{InstrumenterModule, MethodTransformation};
use crate::tooling::type_pool::TypePool;

/// Name matched by class loader matchers for classes of the bootstrap loader.
pub const BOOTSTRAP_LOADER: &str = "<bootstrap>";

/// A class offered for transformation.
#[derive(Clone, Copy, Debug)]
pub struct ClassRequest<'a> {
    pub bytes: &'a [u8],
    /// Where the class file was loaded from, `jar:file:/app/lib.jar!/a/B.class`.
    pub class_file_url: &'a str,
    /// Binary name of the defining loader, `None` for the bootstrap loader.
    pub class_loader: Option<&'a str>,
}

impl<'a> ClassRequest<'a> {
    pub fn new(bytes: &'a [u8], class_file_url: &'a str) -> Self {
        Self {
            bytes,
            class_file_url,
            class_loader: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transformation {
    pub bytes: Vec<u8>,
    /// Instrumenters that matched the class.
    pub matched: Vec<String>,
    /// Internal names of the classes to define in the class loader before the class is used.
    pub helpers: Vec<String>,
}

/// One type instrumentation of a module, identified by its transformation id.
#[derive(Clone, Debug)]
struct Instrumenter {
    name: String,
    helpers: Vec<String>,
}

/// Steps deciding the set of ids matching a class. Recorders run in order: `ForType` and
/// `ForHierarchy` add an id, the `Narrow*` recorders take it back.
#[derive(Debug)]
enum MatchRecorder {
    ForType { id: usize, matcher: TypeMatcher },
    ForHierarchy { id: usize, matcher: HierarchyMatcher },
    NarrowLocation { id: usize, pattern: Arc<Pattern> },
    NarrowClassLoader { id: usize, matcher: TypeMatcher },
}

/// Applies every enabled module to a class in one pass: skip ignored classes, match, weave
/// method advice, then rewrite call sites and add coverage probes when configured.
pub struct CombiningTransformer {
    instrumenters: Vec<Instrumenter>,
    recorders: Vec<MatchRecorder>,
    advice_stacks: Vec<Vec<MethodTransformation>>,
    context_stores: ContextStoreRegistry,
    cache: Arc<dyn ClassMatchingCache>,
    type_pool: TypePool,
    call_sites: Option<CallSiteTransformer>,
    coverage: Option<CoverageInstrumentationFilter>,
    method_ignore: MethodMatcher,
    ignores: GlobalIgnores,
}

impl CombiningTransformer {
    /// `modules` must already be filtered and sorted, as returned by
    /// [`ModuleRegistry::resolve`](crate::tooling::ModuleRegistry::resolve).
    pub fn new(
        modules: &[Arc<dyn InstrumenterModule>],
        type_pool: TypePool,
        cache: Arc<dyn ClassMatchingCache>,
    ) -> Result<Self, PatternError> {
        let mut instrumenters = Vec::new();
        let mut recorders = Vec::new();
        let mut advice_stacks = Vec::new();
        let context_stores = ContextStoreRegistry::new();
        let mut agent_classes = Vec::new();
        for module in modules {
            context_stores.register_module(module.as_ref());
            let helpers: Vec<String> = module
                .helper_class_names()
                .iter()
                .map(|helper| binary_to_internal(helper))
                .collect();
            agent_classes.extend(helpers.iter().cloned());
            let instrumentations = module.type_instrumentations();
            if instrumentations.is_empty() {
                debug!(module = module.name(), "module has no type instrumentations");
            }
            for (index, instrumentation) in instrumentations.into_iter().enumerate() {
                let id = instrumenters.len();
                if let Some(matcher) = instrumentation.type_matcher {
                    recorders.push(MatchRecorder::ForType { id, matcher });
                }
                if let Some(matcher) = instrumentation.hierarchy_matcher {
                    recorders.push(MatchRecorder::ForHierarchy { id, matcher });
                }
                if let Some(location) = &instrumentation.location {
                    let pattern = pattern::compile(location)?;
                    recorders.push(MatchRecorder::NarrowLocation {
                        id,
                        pattern: Arc::new(pattern),
                    });
                }
                if let Some(matcher) = instrumentation.class_loader {
                    recorders.push(MatchRecorder::NarrowClassLoader { id, matcher });
                }
                instrumenters.push(Instrumenter {
                    name: format!("{}[{index}]", module.name()),
                    helpers: helpers.clone(),
                });
                agent_classes.extend(
                    instrumentation
                        .transformations
                        .iter()
                        .map(|transformation| transformation.advice.clone()),
                );
                advice_stacks.push(instrumentation.transformations);
            }
        }
        Ok(Self {
            instrumenters,
            recorders,
            advice_stacks,
            context_stores,
            cache,
            type_pool,
            call_sites: None,
            coverage: None,
            method_ignore: MethodMatcher::IsSynthetic,
            ignores: GlobalIgnores::default().with_classes(&agent_classes),
        })
    }

    pub fn with_call_sites(mut self, call_sites: &CallSites) -> Self {
        self.call_sites = Some(CallSiteTransformer::new(call_sites));
        self
    }

    pub fn with_coverage(mut self, filter: CoverageInstrumentationFilter) -> Self {
        self.coverage = Some(filter);
        self
    }

    /// Methods accepted by `matcher` never receive method advice. Synthetic methods by default.
    pub fn with_method_ignore(mut self, matcher: MethodMatcher) -> Self {
        self.method_ignore = matcher;
        self
    }

    /// Adds user exclusions, `com.example.Secret` or `com.example.generated.*`, to the
    /// classes skipped before matching.
    pub fn with_excludes<S: AsRef<str>>(mut self, excludes: &[S]) -> Self {
        self.ignores = self.ignores.with_excludes(excludes);
        self
    }

    pub fn context_stores(&self) -> &ContextStoreRegistry {
        &self.context_stores
    }

    pub fn instrumenter_count(&self) -> usize {
        self.instrumenters.len()
    }

    /// Transforms a class, leaving it untouched when it cannot be transformed.
    pub fn transform(&self, request: &ClassRequest<'_>) -> Option<Transformation> {
        match self.try_transform(request) {
            Ok(transformation) => transformation,
            Err(
                error @ (ClassFileError::BranchOutOfRange(_) | ClassFileError::CodeTooLarge(_)),
            ) => {
                warn!(url = request.class_file_url, error = %error, "class too large to transform");
                None
            }
            Err(error) => {
                debug!(url = request.class_file_url, error = %error, "failed to transform class");
                None
            }
        }
    }

    pub fn try_transform(
        &self,
        request: &ClassRequest<'_>,
    ) -> ClassFileResult<Option<Transformation>> {
        let reader = ClassReader::new(request.bytes)?;
        let description = reader.type_description()?;
        if self.is_ignored(&description) {
            return Ok(None);
        }
        let ids = self.match_description(&description, request);

        let mut bytes = Cow::Borrowed(request.bytes);
        let mut helpers = Vec::new();
        let mut changed = false;
        if !ids.is_empty() {
            let transformations: Vec<MethodTransformation> = ids
                .iter()
                .flat_map(|id| self.advice_stacks[id].iter().cloned())
                .collect();
            let mut writer = ClassWriter::from_reader(&reader, 0);
            let mut visitor =
                AdviceClassVisitor::new(&mut writer, &transformations, &self.method_ignore);
            reader.accept(&mut visitor)?;
            if visitor.woven() > 0 {
                bytes = Cow::Owned(writer.to_bytes()?);
                changed = true;
            }
            for id in ids.iter() {
                for helper in &self.instrumenters[id].helpers {
                    if !helpers.contains(helper) {
                        helpers.push(helper.clone());
                    }
                }
            }
        }
        if let Some(call_sites) = &self.call_sites {
            if let Some(rewritten) = call_sites.transform(&bytes)? {
                for helper in rewritten.helpers {
                    if !helpers.contains(&helper) {
                        helpers.push(helper);
                    }
                }
                bytes = Cow::Owned(rewritten.bytes);
                changed = true;
            }
        }
        if let Some(filter) = &self.coverage {
            if let Some(probed) = coverage::instrument(&bytes, filter)? {
                bytes = Cow::Owned(probed);
                changed = true;
            }
        }
        if !changed {
            return Ok(None);
        }
        debug!(class = %description.binary_name(), matched = ids.len(), "transformed class");
        Ok(Some(Transformation {
            bytes: bytes.into_owned(),
            matched: self.names(&ids),
            helpers,
        }))
    }

    /// Names of the instrumenters matching a class, without transforming it.
    pub fn match_class(&self, request: &ClassRequest<'_>) -> ClassFileResult<Vec<String>> {
        let description = ClassReader::new(request.bytes)?.type_description()?;
        if self.is_ignored(&description) {
            return Ok(Vec::new());
        }
        Ok(self.names(&self.match_description(&description, request)))
    }

    fn is_ignored(&self, description: &TypeDescription) -> bool {
        let class_name = description.binary_name();
        let ignored = self.ignores.is_ignored(&class_name);
        if ignored {
            debug!(class = %class_name, "class ignored");
        }
        ignored
    }

    fn names(&self, ids: &BitSet) -> Vec<String> {
        ids.iter().map(|id| self.instrumenters[id].name.clone()).collect()
    }

    fn match_description(
        &self,
        description: &TypeDescription,
        request: &ClassRequest<'_>,
    ) -> BitSet {
        self.type_pool.register(description.clone());
        let mut ids = BitSet::with_capacity(self.instrumenters.len());
        let mut hierarchy: Option<BitSet> = None;
        for recorder in &self.recorders {
            match recorder {
                MatchRecorder::ForType { id, matcher } => {
                    if matcher.matches(description) {
                        ids.insert(*id);
                    }
                }
                MatchRecorder::ForHierarchy { id, .. } => {
                    let url = request.class_file_url;
                    let matches =
                        hierarchy.get_or_insert_with(|| self.hierarchy_matches(description, url));
                    if matches.contains(*id) {
                        ids.insert(*id);
                    }
                }
                MatchRecorder::NarrowLocation { id, pattern } => {
                    let location = location_path(request.class_file_url);
                    if ids.contains(*id) && !pattern.matches(location) {
                        ids.remove(*id);
                    }
                }
                MatchRecorder::NarrowClassLoader { id, matcher } => {
                    let loader = request.class_loader.unwrap_or(BOOTSTRAP_LOADER);
                    if ids.contains(*id) && !matcher.matches_name(loader, false) {
                        ids.remove(*id);
                    }
                }
            }
        }
        ids
    }

    /// Ids of every hierarchy recorder matching the class, from the cache when it knows the
    /// class.
    fn hierarchy_matches(&self, description: &TypeDescription, class_file_url: &str) -> BitSet {
        let class_name = description.binary_name();
        if let Some(cached) = self.cache.get_recorded_matching_result(&class_name, class_file_url) {
            return cached;
        }
        let super_types = self.type_pool.super_types(description);
        let mut ids = BitSet::new();
        for recorder in &self.recorders {
            if let MatchRecorder::ForHierarchy { id, matcher } = recorder {
                if super_types
                    .iter()
                    .any(|super_type| matcher.matches_super_type(super_type))
                {
                    ids.insert(*id);
                }
            }
        }
        self.cache
            .record_matching_result(&class_name, class_file_url, &ids);
        ids
    }
}

/// File system path of the class file, or of the archive holding it, that `url` points to.
fn location_path(url: &str) -> &str {
    let url = url.strip_prefix("jar:").unwrap_or(url);
    let url = url.split_once("!/").map_or(url, |(archive, _)| archive);
    url.strip_prefix("file:").unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::bytecode::writer::tests::{class_extending, class_with_method, method_events};
    use crate::ir::MethodDescription;
    use crate::matching::NoClassMatchingCache;
    use crate::opcodes;
    use crate::tooling::declared::DeclaredModule;
    use crate::tooling::module::{TargetSystem, TypeInstrumentation};

    #[derive(Default)]
    struct MemoryCache {
        seed: HashMap<(String, String), BitSet>,
        recorded: Mutex<Vec<(String, String, BitSet)>>,
    }

    impl ClassMatchingCache for MemoryCache {
        fn get_recorded_matching_result(&self, class_name: &str, url: &str) -> Option<BitSet> {
            self.seed
                .get(&(class_name.to_string(), url.to_string()))
                .cloned()
        }

        fn record_matching_result(&self, class_name: &str, url: &str, ids: &BitSet) {
            self.recorded
                .lock()
                .push((class_name.to_string(), url.to_string(), ids.clone()));
        }

        fn shutdown(&self) {}
    }

    fn runnable_module() -> Arc<dyn InstrumenterModule> {
        Arc::new(
            DeclaredModule::new("executors", TargetSystem::Tracing).with_instrumentation(
                TypeInstrumentation::for_hierarchy(HierarchyMatcher::ImplementsInterface {
                    matcher: TypeMatcher::named("java.lang.Runnable"),
                })
                .with_advice(MethodMatcher::named("run"), "com.example.RunAdvice"),
            ),
        )
    }

    fn handler_module() -> Arc<dyn InstrumenterModule> {
        let mut module = DeclaredModule::new("http", TargetSystem::Tracing).with_order(-1);
        module.helpers = vec!["com.example.http.Decorator".to_string()];
        Arc::new(module.with_instrumentation(
            TypeInstrumentation::for_type("com.example.Handler")
                .with_advice(MethodMatcher::named("handle"), "com.example.http.HandleAdvice"),
        ))
    }

    #[test]
    fn weaves_matched_type_and_reports_helpers() {
        let transformer = CombiningTransformer::new(
            &[handler_module()],
            TypePool::empty(8),
            Arc::new(NoClassMatchingCache),
        )
        .expect("transformer");
        let bytes = class_with_method(
            "com/example/Handler",
            MethodDescription::new(opcodes::ACC_PUBLIC, "handle", "()V"),
            |visitor| visitor.visit_insn(opcodes::RETURN),
        );

        let transformation = transformer
            .transform(&ClassRequest::new(&bytes, "file:/app/classes/"))
            .expect("class transformed");

        assert_eq!(transformation.matched, vec!["http[0]"]);
        assert_eq!(transformation.helpers, vec!["com/example/http/Decorator"]);
        let events = method_events(&transformation.bytes, "handle");
        assert_eq!(
            events[1],
            "method 0xb8 com/example/http/HandleAdvice.onMethodEnter()V"
        );
    }

    #[test]
    fn unmatched_or_broken_classes_are_left_alone() {
        let transformer = CombiningTransformer::new(
            &[handler_module()],
            TypePool::empty(8),
            Arc::new(NoClassMatchingCache),
        )
        .expect("transformer");
        let other = class_extending("com/example/Other", "java/lang/Object", &[]);

        assert_eq!(transformer.transform(&ClassRequest::new(&other, "file:/a/")), None);
        assert_eq!(
            transformer.transform(&ClassRequest::new(b"\xca\xfe", "file:/a/")),
            None
        );
    }

    #[test]
    fn hierarchy_results_go_through_the_cache() {
        let cache = Arc::new(MemoryCache::default());
        let transformer = CombiningTransformer::new(
            &[handler_module(), runnable_module()],
            TypePool::empty(8),
            cache.clone(),
        )
        .expect("transformer");
        let task = class_extending("com/example/Task", "java/lang/Object", &["java/lang/Runnable"]);

        let matched = transformer
            .match_class(&ClassRequest::new(&task, "file:/app.jar"))
            .expect("match");

        assert_eq!(matched, vec!["executors[0]"]);
        let recorded = cache.recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "com.example.Task");
        assert_eq!(recorded[0].2, [1].into_iter().collect::<BitSet>());
    }

    #[test]
    fn cached_hierarchy_result_skips_the_walk() {
        let mut cache = MemoryCache::default();
        cache.seed.insert(
            ("com.example.Plain".to_string(), "file:/app.jar".to_string()),
            [0].into_iter().collect(),
        );
        let cache = Arc::new(cache);
        let transformer =
            CombiningTransformer::new(&[runnable_module()], TypePool::empty(8), cache.clone())
                .expect("transformer");
        let plain = class_extending("com/example/Plain", "java/lang/Object", &[]);

        let matched = transformer
            .match_class(&ClassRequest::new(&plain, "file:/app.jar"))
            .expect("match");

        assert_eq!(matched, vec!["executors[0]"]);
        assert!(cache.recorded.lock().is_empty());
    }

    #[test]
    fn location_and_loader_narrow_matches() {
        let mut instrumentation = TypeInstrumentation::for_type("com.example.Handler");
        instrumentation.location = Some("app-*.jar".to_string());
        instrumentation.class_loader = Some(TypeMatcher::Not {
            matcher: Box::new(TypeMatcher::named(BOOTSTRAP_LOADER)),
        });
        let module: Arc<dyn InstrumenterModule> = Arc::new(
            DeclaredModule::new("narrow", TargetSystem::Tracing)
                .with_instrumentation(instrumentation),
        );
        let transformer = CombiningTransformer::new(
            &[module],
            TypePool::empty(8),
            Arc::new(NoClassMatchingCache),
        )
        .expect("transformer");
        let handler = class_extending("com/example/Handler", "java/lang/Object", &[]);
        let request = |url: &'static str, class_loader: Option<&'static str>| ClassRequest {
            bytes: &handler,
            class_file_url: url,
            class_loader,
        };

        let app_loader = Some("com.example.AppClassLoader");
        let in_app_jar = "jar:file:/opt/app-1.0.jar!/com/example/Handler.class";
        assert_eq!(
            transformer
                .match_class(&request(in_app_jar, app_loader))
                .expect("match")
                .len(),
            1
        );
        assert!(transformer
            .match_class(&request("file:/opt/other.jar", app_loader))
            .expect("match")
            .is_empty());
        assert!(transformer
            .match_class(&request(in_app_jar, None))
            .expect("match")
            .is_empty());
    }

    #[test]
    fn location_path_strips_url_wrapping() {
        assert_eq!(location_path("jar:file:/opt/app.jar!/a/B.class"), "/opt/app.jar");
        assert_eq!(location_path("file:/opt/classes/a/B.class"), "/opt/classes/a/B.class");
        let jrt = "jrt:/java.base/java/lang/String.class";
        assert_eq!(location_path(jrt), jrt);
    }

    #[test]
    fn invalid_location_fails_at_build_time() {
        let mut instrumentation = TypeInstrumentation::for_type("com.example.Handler");
        instrumentation.location = Some("[z-a].jar".to_string());
        let module: Arc<dyn InstrumenterModule> = Arc::new(
            DeclaredModule::new("broken", TargetSystem::Tracing)
                .with_instrumentation(instrumentation),
        );

        let transformer = CombiningTransformer::new(
            &[module],
            TypePool::empty(8),
            Arc::new(NoClassMatchingCache),
        );
        assert!(transformer.is_err());
    }

    #[test]
    fn ignored_classes_are_never_matched_or_recorded() {
        let cache = Arc::new(MemoryCache::default());
        let transformer = CombiningTransformer::new(
            &[handler_module(), runnable_module()],
            TypePool::empty(8),
            cache.clone(),
        )
        .expect("transformer")
        .with_excludes(&["com.example.legacy.*"]);
        let runnable = |name| class_extending(name, "java/lang/Object", &["java/lang/Runnable"]);
        let classes = [
            runnable("jdk/internal/misc/Worker"),
            runnable("com/example/legacy/Task"),
            runnable("com/example/http/Decorator"),
        ];

        for bytes in &classes {
            let request = ClassRequest::new(bytes, "file:/app.jar");
            assert!(transformer.match_class(&request).expect("match").is_empty());
            assert_eq!(transformer.transform(&request), None);
        }
        assert!(cache.recorded.lock().is_empty());
    }
}
