use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};

use super::specification::DrugField;
use super::DatabaseError;

/// Largest page size `Pageable::new` accepts.
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One `ORDER BY` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: DrugField,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field: DrugField) -> Self {
        Self {
            field,
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: DrugField) -> Self {
        Self {
            field,
            direction: Direction::Desc,
        }
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pageable {
    page: u32,
    size: u32,
    sort: Vec<Sort>,
}

impl Pageable {
    /// Creates an unsorted page request.
    ///
    /// Parameters:
    /// - `page`: Zero-based page number.
    /// - `size`: Rows per page, `1..=MAX_PAGE_SIZE`.
    ///
    /// Returns:
    /// - `Ok(Pageable)` for a valid size.
    /// - `Err(DatabaseError::InvalidQuery)` if `size` is zero or above
    ///   `MAX_PAGE_SIZE`.
    pub fn new(page: u32, size: u32) -> Result<Self, DatabaseError> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(DatabaseError::InvalidQuery(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, size
            )));
        }
        Ok(Self {
            page,
            size,
            sort: Vec::new(),
        })
    }

    /// Adds a sort key after the ones already set.
    pub fn sorted_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sort(&self) -> &[Sort] {
        &self.sort
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }

    /// Appends `ORDER BY ... LIMIT ... OFFSET ...`. The drug id is always the
    /// last sort key so pages are stable.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        let mut terms: Vec<String> = self
            .sort
            .iter()
            .map(|sort| {
                let direction = match sort.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{} {}", sort.field.column(), direction)
            })
            .collect();
        if !self.sort.iter().any(|s| s.field == DrugField::DrugId) {
            terms.push(format!("{} ASC", DrugField::DrugId.column()));
        }

        qb.push(" ORDER BY ")
            .push(terms.join(", "))
            .push(" LIMIT ")
            .push_bind(i64::from(self.size))
            .push(" OFFSET ")
            .push_bind(self.offset());
    }
}

/// One page of results with the total number of matching rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, pageable: &Pageable, total_elements: u64) -> Self {
        Self {
            content,
            page: pageable.page(),
            size: pageable.size(),
            total_elements,
        }
    }

    /// Number of pages of this size needed for `total_elements`.
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total_elements.div_ceil(u64::from(self.size))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) + 1 < self.total_pages()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}
