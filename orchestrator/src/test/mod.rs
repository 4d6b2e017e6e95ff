mod kubernetes_tests;
pub mod util;
