mod serve;

pub(crate) use serve::serve;
