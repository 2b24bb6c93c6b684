//! Classes never offered to instrumenters: the agent's own code, JDK internals, other agents
//! and generated classes.

/// Prefix rules, the longest matching prefix decides. `false` re-admits a package below an
/// ignored one.
const DEFAULT_RULES: &[(&str, bool)] = &[
    ("datadog.", true),
    ("com.datadog.", true),
    ("jweave.", true),
    ("jdk.", true),
    ("java.", true),
    ("java.lang.Throwable", false),
    ("java.net.URL", false),
    ("java.net.HttpURLConnection", false),
    ("java.rmi.", false),
    ("java.util.concurrent.", false),
    ("javax.el.", true),
    ("javax.xml.", true),
    ("sun.", true),
    ("sun.net.www.protocol.", false),
    ("sun.net.www.http.HttpClient", false),
    ("sun.rmi.server", false),
    ("sun.rmi.transport", false),
    ("com.sun.", true),
    ("com.sun.messaging.", false),
    ("com.sun.jersey.api.client", false),
    ("kotlin.", true),
    ("clojure.", true),
    ("net.bytebuddy.", true),
    ("net.sf.cglib.", true),
    ("org.aspectj.", true),
    ("org.codehaus.groovy.", true),
    ("org.codehaus.groovy.runtime.", false),
    ("org.groovy.", true),
    ("com.appdynamics.", true),
    ("com.dynatrace.", true),
    ("com.newrelic.", true),
    ("com.intellij.rt.debugger.", true),
    ("io.micrometer.", true),
];

/// Fragments of generated class names: proxies, accessors and bytecode libraries.
const GENERATED_MARKERS: &[&str] = &[
    "CGLIB$$",
    "$JaxbAccessor",
    "$$EnhancerByProxool$$",
    "$__sisu",
    "javassist",
    ".asm.",
];

/// Decides whether a class is skipped before any match recorder runs.
#[derive(Clone, Debug)]
pub struct GlobalIgnores {
    rules: Vec<(String, bool)>,
    excludes: Vec<Exclude>,
}

/// User exclusion: `com.example.Secret` for one class, `com.example.generated.*` for a
/// prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Exclude {
    Exact(String),
    Prefix(String),
}

impl Default for GlobalIgnores {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES
                .iter()
                .map(|(prefix, ignored)| (prefix.to_string(), *ignored))
                .collect(),
            excludes: Vec::new(),
        }
    }
}

impl GlobalIgnores {
    /// Adds user exclusions in binary or internal form. They win over every default rule.
    pub fn with_excludes<S: AsRef<str>>(mut self, excludes: &[S]) -> Self {
        for exclude in excludes {
            let exclude = exclude.as_ref().trim().replace('/', ".");
            if exclude.is_empty() {
                continue;
            }
            self.excludes.push(match exclude.strip_suffix('*') {
                Some(prefix) => Exclude::Prefix(prefix.to_string()),
                None => Exclude::Exact(exclude),
            });
        }
        self
    }

    /// Ignores the given classes and every nested class of them.
    pub fn with_classes<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            let name = name.as_ref().replace('/', ".");
            self.excludes.push(Exclude::Prefix(format!("{name}$")));
            self.excludes.push(Exclude::Exact(name));
        }
        self
    }

    /// `name` is a binary name, `java.lang.String`.
    pub fn is_ignored(&self, name: &str) -> bool {
        let excluded = self.excludes.iter().any(|exclude| match exclude {
            Exclude::Exact(exact) => name == exact,
            Exclude::Prefix(prefix) => name.starts_with(prefix.as_str()),
        });
        if excluded {
            return true;
        }
        let rule = self
            .rules
            .iter()
            .filter(|(prefix, _)| name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        if let Some((_, ignored)) = rule {
            return *ignored;
        }
        let generated = name.find('$').is_some_and(|dollar| {
            let nested = &name[dollar..];
            nested.starts_with("$loader__")
                || nested.contains("$fn__")
                || nested.contains("$reify__")
        });
        generated || GENERATED_MARKERS.iter().any(|marker| name.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_and_runtime_internals_are_ignored() {
        let ignores = GlobalIgnores::default();

        assert!(ignores.is_ignored("datadog.trace.api.Tracer"));
        assert!(ignores.is_ignored("jdk.internal.misc.Unsafe"));
        assert!(ignores.is_ignored("sun.reflect.GeneratedMethodAccessor1"));
        assert!(ignores.is_ignored("java.lang.String"));
        assert!(!ignores.is_ignored("com.example.Handler"));
    }

    #[test]
    fn longer_prefix_re_admits_packages() {
        let ignores = GlobalIgnores::default();

        assert!(!ignores.is_ignored("java.util.concurrent.ThreadPoolExecutor"));
        assert!(!ignores.is_ignored("java.net.URL"));
        assert!(!ignores.is_ignored("sun.net.www.protocol.http.HttpURLConnection"));
        assert!(ignores.is_ignored("sun.net.www.MessageHeader"));
        assert!(!ignores.is_ignored("org.codehaus.groovy.runtime.InvokerHelper"));
        assert!(ignores.is_ignored("org.codehaus.groovy.ast.ClassNode"));
    }

    #[test]
    fn generated_classes_are_ignored() {
        let ignores = GlobalIgnores::default();

        assert!(ignores.is_ignored("com.example.Service$$EnhancerByCGLIB$$1a2b"));
        assert!(ignores.is_ignored("com.example.Service$$EnhancerByProxool$$7"));
        assert!(ignores.is_ignored("app.core$fn__1234"));
        assert!(ignores.is_ignored("org.objectweb.asm.ClassReader"));
        assert!(!ignores.is_ignored("com.example.Service$Inner"));
    }

    #[test]
    fn excludes_win_over_default_rules() {
        let ignores = GlobalIgnores::default()
            .with_excludes(&["com.example.Secret", "com/example/generated/*", " "])
            .with_classes(&["com/example/Timing"]);

        assert!(ignores.is_ignored("com.example.Secret"));
        assert!(!ignores.is_ignored("com.example.SecretKeeper"));
        assert!(ignores.is_ignored("com.example.generated.Stub"));
        assert!(ignores.is_ignored("com.example.Timing"));
        assert!(ignores.is_ignored("com.example.Timing$Scope"));
        assert!(!ignores.is_ignored("com.example.Handler"));

        let rescued = GlobalIgnores::default().with_excludes(&["java.util.concurrent.*"]);
        assert!(rescued.is_ignored("java.util.concurrent.ForkJoinPool"));
    }
}
