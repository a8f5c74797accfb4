//! Coefficient arithmetic for the slot extension field `F_{p^d}`.
//!
//! Elements are coefficient vectors against a caller-supplied monic
//! irreducible modulus. All operations return vectors normalized to
//! length `d`; inputs shorter than `d` are treated as zero-extended, so
//! `vec![3]` is the base-field constant 3 at any degree.

/// One extension-field element.
pub type Fq = Vec<u64>;

#[derive(Clone, Debug)]
pub struct SlotField {
    p: u64,
    /// Monic modulus `G`, low-to-high, `len = d + 1`.
    modulus: Vec<u64>,
}

impl SlotField {
    pub fn new(p: u64, modulus: Vec<u64>) -> Self {
        assert!(p >= 2);
        assert!(modulus.len() >= 2, "modulus must have degree >= 1");
        assert_eq!(*modulus.last().unwrap(), 1, "modulus must be monic");
        SlotField { p, modulus }
    }

    pub fn p(&self) -> u64 {
        self.p
    }

    pub fn degree(&self) -> usize {
        self.modulus.len() - 1
    }

    pub fn zero(&self) -> Fq {
        vec![0; self.degree()]
    }

    pub fn one(&self) -> Fq {
        self.from_base(1)
    }

    pub fn from_base(&self, v: u64) -> Fq {
        let mut out = self.zero();
        out[0] = v % self.p;
        out
    }

    pub fn is_zero(&self, a: &Fq) -> bool {
        a.iter().all(|&c| c % self.p == 0)
    }

    pub fn eq(&self, a: &Fq, b: &Fq) -> bool {
        self.is_zero(&self.sub(a, b))
    }

    fn coeff(&self, a: &Fq, i: usize) -> u64 {
        a.get(i).copied().unwrap_or(0) % self.p
    }

    pub fn add(&self, a: &Fq, b: &Fq) -> Fq {
        (0..self.degree())
            .map(|i| (self.coeff(a, i) + self.coeff(b, i)) % self.p)
            .collect()
    }

    pub fn sub(&self, a: &Fq, b: &Fq) -> Fq {
        (0..self.degree())
            .map(|i| (self.p + self.coeff(a, i) - self.coeff(b, i)) % self.p)
            .collect()
    }

    pub fn scale(&self, a: &Fq, s: u64) -> Fq {
        let s = s % self.p;
        (0..self.degree())
            .map(|i| self.coeff(a, i) * s % self.p)
            .collect()
    }

    pub fn mul(&self, a: &Fq, b: &Fq) -> Fq {
        let d = self.degree();
        let mut wide = vec![0u64; 2 * d - 1];
        for i in 0..d {
            let ai = self.coeff(a, i);
            if ai == 0 {
                continue;
            }
            for j in 0..d {
                wide[i + j] = (wide[i + j] + ai * self.coeff(b, j)) % self.p;
            }
        }
        // reduce mod the monic modulus, high coefficients first
        for k in (d..wide.len()).rev() {
            let c = wide[k];
            if c == 0 {
                continue;
            }
            wide[k] = 0;
            for (t, &g) in self.modulus.iter().enumerate().take(d) {
                let pos = k - d + t;
                wide[pos] = (wide[pos] + self.p * self.p - c * (g % self.p) % (self.p * self.p))
                    % self.p;
            }
        }
        wide.truncate(d);
        wide
    }

    pub fn pow(&self, a: &Fq, mut e: u128) -> Fq {
        let mut base = self.mul(a, &self.one());
        let mut out = self.one();
        while e > 0 {
            if e & 1 == 1 {
                out = self.mul(&out, &base);
            }
            base = self.mul(&base, &base);
            e >>= 1;
        }
        out
    }

    pub fn inv(&self, a: &Fq) -> Fq {
        assert!(!self.is_zero(a), "inverse of zero");
        let order = (0..self.degree()).fold(1u128, |acc, _| acc * self.p as u128);
        self.pow(a, order - 2)
    }

    /// `x^{p^e}`, the `e`-th Frobenius power.
    pub fn frobenius(&self, a: &Fq, e: usize) -> Fq {
        let e = e % self.degree();
        if e == 0 {
            return self.mul(a, &self.one());
        }
        let exp = (0..e).fold(1u128, |acc, _| acc * self.p as u128);
        self.pow(a, exp)
    }

    /// Apply a `d x d` base-field matrix (row-major) to an element viewed
    /// as a coefficient vector.
    pub fn apply_matrix(&self, m: &[u64], x: &Fq) -> Fq {
        let d = self.degree();
        assert_eq!(m.len(), d * d);
        (0..d)
            .map(|r| {
                (0..d).fold(0u64, |acc, c| {
                    (acc + m[r * d + c] % self.p * self.coeff(x, c)) % self.p
                })
            })
            .collect()
    }

    /// Linearized-polynomial coefficients of the base-linear map `m`
    /// (`d x d`, row-major): the unique `lambda_0..lambda_{d-1}` with
    /// `m(x) = sum_t lambda_t * x^{p^t}`.
    ///
    /// Solves the Moore system `sum_t (X^s)^{p^t} * lambda_t = m(X^s)`
    /// for the power basis `X^s` by Gaussian elimination over `F_{p^d}`.
    pub fn lin_poly_coeffs(&self, m: &[u64]) -> Vec<Fq> {
        let d = self.degree();
        assert_eq!(m.len(), d * d);

        let x_pow = |s: usize| {
            let mut v = self.zero();
            v[s] = 1;
            v
        };

        let mut rows: Vec<Vec<Fq>> = (0..d)
            .map(|s| (0..d).map(|t| self.frobenius(&x_pow(s), t)).collect())
            .collect();
        let mut rhs: Vec<Fq> = (0..d).map(|s| self.apply_matrix(m, &x_pow(s))).collect();

        // forward elimination with full pivoting down the column
        for col in 0..d {
            let pivot = (col..d)
                .find(|&r| !self.is_zero(&rows[r][col]))
                .expect("Moore matrix is singular");
            rows.swap(col, pivot);
            rhs.swap(col, pivot);

            let scale = self.inv(&rows[col][col]);
            for t in 0..d {
                rows[col][t] = self.mul(&rows[col][t], &scale);
            }
            rhs[col] = self.mul(&rhs[col], &scale);

            for r in 0..d {
                if r == col || self.is_zero(&rows[r][col]) {
                    continue;
                }
                let factor = rows[r][col].clone();
                for t in 0..d {
                    let delta = self.mul(&factor, &rows[col][t]);
                    rows[r][t] = self.sub(&rows[r][t], &delta);
                }
                let delta = self.mul(&factor, &rhs[col]);
                rhs[r] = self.sub(&rhs[r], &delta);
            }
        }

        rhs
    }
}
