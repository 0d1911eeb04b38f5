use single_utilities::traits::FloatOps;
use std::collections::HashMap;

pub mod compare;
pub mod correction;
pub mod de;
pub mod effect;
pub mod inference;

pub mod utils;

pub use compare::{ComparisonSummary, JoinPolicy, JoinedResults, join_results};
pub use correction::Correction;
pub use de::{DeParams, DeRow, DeTable, OmittedGene, differential_expression};

/// Test backend used by the differential expression engine.
///
/// The set is closed: every variant maps to one implementation of
/// [`inference::GeneTest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestMethod {
    /// Wilcoxon rank-sum (Mann-Whitney U) on normalized values.
    #[default]
    MannWhitney,
    TTest(TTestType),
    /// Negative binomial likelihood-ratio test on raw (pseudobulk) counts.
    NegativeBinomial,
    /// Two-part hurdle model (detection + positive expression) adjusted for
    /// each cell's detection rate.
    Hurdle,
}

impl TestMethod {
    /// Short stable name, as reported in result tables.
    pub fn name(&self) -> &'static str {
        match self {
            TestMethod::MannWhitney => "wilcox",
            TestMethod::TTest(TTestType::Student) => "t_student",
            TestMethod::TTest(TTestType::Welch) => "t_welch",
            TestMethod::NegativeBinomial => "negbinom",
            TestMethod::Hurdle => "hurdle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TTestType {
    Student, // Equal variance
    Welch,   // Unequal variance
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alternative {
    TwoSided,
    Less,
    Greater,
}

#[derive(Debug, Clone)]
pub struct TestResult<T> {
    /// The test statistic value (e.g., t-statistic, U statistic)
    pub statistic: T,
    /// The p-value of the test
    pub p_value: T,
    /// Degrees of freedom (for parametric inference)
    pub degrees_of_freedom: Option<T>,
    /// Effect size measurement
    pub effect_size: Option<T>,
    /// Standard error of the effect size or test statistic
    pub standard_error: Option<T>,
    /// Additional test-specific information
    pub metadata: HashMap<String, T>,
}

impl<T> TestResult<T>
where
    T: FloatOps,
{
    /// Create a new test result with minimal information
    pub fn new(statistic: T, p_value: T) -> Self {
        TestResult {
            statistic,
            p_value,
            degrees_of_freedom: None,
            effect_size: None,
            standard_error: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a new test result with effect size
    pub fn with_effect_size(statistic: T, p_value: T, effect_size: T) -> Self {
        TestResult {
            effect_size: Some(effect_size),
            ..Self::new(statistic, p_value)
        }
    }

    /// Set or replace the effect size
    pub fn effect(mut self, effect_size: T) -> Self {
        self.effect_size = Some(effect_size);
        self
    }

    /// Add degrees of freedom to the result
    pub fn with_degrees_of_freedom(mut self, df: T) -> Self {
        self.degrees_of_freedom = Some(df);
        self
    }

    /// Add standard error to the result
    pub fn with_standard_error(mut self, se: T) -> Self {
        self.standard_error = Some(se);
        self
    }

    /// Add additional metadata
    pub fn with_metadata(mut self, key: &str, value: T) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}
