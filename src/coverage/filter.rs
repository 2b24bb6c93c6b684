/// Decides which classes get coverage probes, by internal-name package prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageInstrumentationFilter {
    included: Vec<String>,
    excluded: Vec<String>,
}

impl CoverageInstrumentationFilter {
    /// Prefixes may be written in dotted (`com.example.`) or internal (`com/example/`) form.
    pub fn new<I, E>(included: I, excluded: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            included: included.into_iter().map(normalize).collect(),
            excluded: excluded.into_iter().map(normalize).collect(),
        }
    }

    /// Classes in the default package are always included. Otherwise exclusions are
    /// checked first, then inclusions; a class matching neither is rejected.
    pub fn test(&self, class_name: &str) -> bool {
        if !class_name.contains('/') {
            return true;
        }
        if self
            .excluded
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
        {
            return false;
        }
        self.included
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
    }
}

fn normalize(prefix: impl AsRef<str>) -> String {
    prefix.as_ref().trim().replace('.', "/")
}
