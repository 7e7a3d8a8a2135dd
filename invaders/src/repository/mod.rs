pub(crate) mod bucket_repository;
pub(crate) mod volume_repository;
