//! Workspace-level tests: block partitioning over realistic methods, and the behavioural
//! properties of each transform checked against the reference interpreter.

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod partition;

#[cfg(test)]
mod transforms {
    mod anti_debug;
    mod flatten;
    mod obfuscator;
    mod rename;
    mod strings;
}
