pub mod inference;
pub mod model;
pub mod recommendation;
pub mod routes;
